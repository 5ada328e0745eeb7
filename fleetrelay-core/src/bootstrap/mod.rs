//! Startup helpers: configuration, database pool and presence backend

pub mod config;
pub mod database;
pub mod presence;

pub use config::load_config;
pub use database::init_database;
pub use presence::init_presence;
