pub mod error;
pub mod relay;
pub mod rooms;
pub mod sync;

pub use error::{Error, Result};
pub use relay::{AdminBatcher, RelayEngine};
pub use rooms::RoomName;
pub use sync::{ClusterConfig, ClusterManager, ConnectionId, EventName, RoomEvent, RoomMessageHub};
