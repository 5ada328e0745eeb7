pub mod command;
pub mod device;
pub mod envelope;
pub mod id;
pub mod runtime_config;

pub use command::{Command, CommandStatus, CreateCommandRequest, UpdateCommandStatusRequest};
pub use device::{Device, DeviceLight};
pub use envelope::{ChangeType, EventEnvelope, EventKind};
pub use id::{generate_id, CommandId, DeviceId};
pub use runtime_config::{RuntimeConfig, RuntimeConfigPatch};
