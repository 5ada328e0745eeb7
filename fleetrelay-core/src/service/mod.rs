pub mod auth;
pub mod command;
pub mod runtime_config;

pub use auth::{DashboardClaims, DashboardRole, DeviceClaims, JwtService};
pub use command::CommandService;
pub use runtime_config::{RuntimeConfigCell, RuntimeConfigHandle};
