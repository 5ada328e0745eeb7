//! Primary-store access used by the relay subsystem

pub mod command;
pub mod device;
pub mod runtime_config;

pub use command::{CommandStore, PgCommandStore};
pub use device::{DeviceStore, PgDeviceStore};
pub use runtime_config::{PgRuntimeConfigSource, RuntimeConfigSource};

#[cfg(any(test, feature = "testing"))]
pub use command::MockCommandStore;
#[cfg(any(test, feature = "testing"))]
pub use device::MockDeviceStore;
#[cfg(any(test, feature = "testing"))]
pub use runtime_config::MockRuntimeConfigSource;

use sqlx::{PgPool, Postgres, Transaction};

/// Open a transaction whose writes the change-feed triggers ignore.
///
/// The relay emits its own events for these writes, so the NOTIFY path must not echo them.
pub(crate) async fn relay_origin_tx(pool: &PgPool) -> crate::Result<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT set_config('fleetrelay.origin', 'relay', true)")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Pool against `DATABASE_URL` with migrations applied, for tests that need PostgreSQL
#[cfg(test)]
pub(crate) async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| crate::config::DatabaseConfig::default().url);
    let pool = PgPool::connect(&url).await.expect("connect to test database");
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}
