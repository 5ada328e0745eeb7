use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{Command, CommandId, CommandStatus, DeviceId},
    Error, Result,
};

const COMMAND_COLUMNS: &str =
    "id, device_id, command_type, payload, status, created_at, delivered_at, executed_at, error";

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn create(&self, command: &Command) -> Result<Command>;

    async fn get(&self, id: &CommandId) -> Result<Option<Command>>;

    /// Oldest first
    async fn list_for_device(&self, device_id: &DeviceId, status: Option<CommandStatus>) -> Result<Vec<Command>>;

    /// Compare-and-set on the current status. `None` means the command is no longer in `from`.
    async fn update_status(
        &self,
        id: &CommandId,
        from: CommandStatus,
        to: CommandStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<Command>>;
}

#[derive(Clone)]
pub struct PgCommandStore {
    pool: PgPool,
}

impl PgCommandStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_command(row: &PgRow) -> Result<Command> {
        let status: String = row.try_get("status")?;
        Ok(Command {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            command_type: row.try_get("command_type")?,
            payload: row.try_get("payload")?,
            status: status.parse().map_err(Error::Internal)?,
            created_at: row.try_get("created_at")?,
            delivered_at: row.try_get("delivered_at")?,
            executed_at: row.try_get("executed_at")?,
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl CommandStore for PgCommandStore {
    async fn create(&self, command: &Command) -> Result<Command> {
        let row = sqlx::query(&format!(
            "INSERT INTO commands (id, device_id, command_type, payload, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COMMAND_COLUMNS}"
        ))
        .bind(&command.id)
        .bind(&command.device_id)
        .bind(&command.command_type)
        .bind(&command.payload)
        .bind(command.status.as_str())
        .bind(command.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_command(&row)
    }

    async fn get(&self, id: &CommandId) -> Result<Option<Command>> {
        let row = sqlx::query(&format!("SELECT {COMMAND_COLUMNS} FROM commands WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_command).transpose()
    }

    async fn list_for_device(&self, device_id: &DeviceId, status: Option<CommandStatus>) -> Result<Vec<Command>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMAND_COLUMNS} FROM commands
             WHERE device_id = $1 AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY created_at ASC"
        ))
        .bind(device_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_command).collect()
    }

    async fn update_status(
        &self,
        id: &CommandId,
        from: CommandStatus,
        to: CommandStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<Command>> {
        let row = sqlx::query(&format!(
            "UPDATE commands
             SET status = $3,
                 error = COALESCE($4, error),
                 delivered_at = CASE WHEN $3 = 'delivered' THEN $5 ELSE delivered_at END,
                 executed_at = CASE WHEN $3 = 'executed' THEN $5 ELSE executed_at END
             WHERE id = $1 AND status = $2
             RETURNING {COMMAND_COLUMNS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_command).transpose()
    }
}
