pub mod jwt;

pub use jwt::{DashboardClaims, DashboardRole, DeviceClaims, JwtService};
