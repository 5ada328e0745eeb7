//! Relay Engine: routes normalized events into rooms
//!
//! Per-device rooms always get the full event immediately. Admin aggregate
//! rooms get device and message updates in 1s batches. The global room is
//! skipped while high-scale mode is on.

mod batcher;
mod engine;

pub use batcher::AdminBatcher;
pub use engine::RelayEngine;
