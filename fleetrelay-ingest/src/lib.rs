//! Upstream adapters and periodic jobs feeding the relay
//!
//! Every adapter normalizes what it receives into an `EventEnvelope` and hands
//! it to an `EventSink`. Adapters run as independent tasks so a failing
//! upstream never stalls the others.

pub mod alt_source;
pub mod config_sync;
pub mod error;
pub mod mqtt;
pub mod pg_listener;
pub mod signals;
pub mod sweeper;

pub use alt_source::{AltSourceListener, FirebaseSource, TreeSource};
pub use config_sync::ConfigSync;
pub use error::{IngestError, Result};
pub use mqtt::MqttSubscriber;
pub use pg_listener::PgChangeListener;
pub use signals::DeviceSignals;
pub use sweeper::StaleSweeper;
