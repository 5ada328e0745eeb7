//! Command lifecycle: persistence via [`CommandStore`], every change relayed as `command_change`

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::{
    models::{
        ChangeType, Command, CommandId, CommandStatus, CreateCommandRequest, DeviceId,
        EventEnvelope, EventKind,
    },
    repository::CommandStore,
    sink::EventSink,
    Error, Result,
};

#[derive(Clone)]
pub struct CommandService {
    store: Arc<dyn CommandStore>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService").finish_non_exhaustive()
    }
}

impl CommandService {
    pub fn new(store: Arc<dyn CommandStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    pub async fn create(&self, device_id: DeviceId, request: CreateCommandRequest) -> Result<Command> {
        let command_type = request.command_type.trim();
        if command_type.is_empty() {
            return Err(Error::InvalidInput("command_type must not be empty".to_string()));
        }

        let command = Command::new(device_id, command_type.to_string(), request.payload);
        let created = self.store.create(&command).await?;
        info!(command_id = %created.id, device_id = %created.device_id, command_type = %created.command_type, "Command created");

        self.relay(ChangeType::Insert, &created, None)?;
        Ok(created)
    }

    pub async fn get(&self, id: &CommandId) -> Result<Command> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Command {id} not found")))
    }

    pub async fn list_for_device(&self, device_id: &DeviceId, status: Option<CommandStatus>) -> Result<Vec<Command>> {
        self.store.list_for_device(device_id, status).await
    }

    /// Move a command to `next`, rejecting anything the state machine does not allow
    pub async fn transition(&self, id: &CommandId, next: CommandStatus, error: Option<String>) -> Result<Command> {
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Command {id} not found")))?;

        if !current.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        let updated = self
            .store
            .update_status(id, current.status, next, error, Utc::now())
            .await?
            // lost a race with another writer; report against the state we read
            .ok_or_else(|| Error::InvalidTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            })?;

        info!(command_id = %id, from = %current.status, to = %next, "Command status changed");
        self.relay(ChangeType::Update, &updated, Some(&current))?;
        Ok(updated)
    }

    fn relay(&self, change: ChangeType, command: &Command, previous: Option<&Command>) -> Result<()> {
        let new = serde_json::to_value(command)?;
        let old = previous.map(serde_json::to_value).transpose()?;
        self.sink.emit(
            EventEnvelope::new(EventKind::CommandChange, change, command.device_id.clone(), Some(new))
                .with_old(old),
        );
        Ok(())
    }
}
