pub mod models;
pub mod repository;
pub mod service;
pub mod presence;
pub mod config;
pub mod error;
pub mod logging;
pub mod bootstrap;
pub mod metrics;
pub mod sink;

pub use config::Config;
pub use error::{Error, Result};
pub use presence::PresenceIndex;
pub use sink::EventSink;
