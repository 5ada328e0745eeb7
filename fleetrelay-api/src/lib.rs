// fleetrelay API library
//
// HTTP surface of the relay: dashboard websocket, broker callouts,
// command endpoints, presence reads, health and metrics

pub mod http;

pub use http::{create_router, AppState};
