pub mod config;
pub mod enrich;
pub mod service;
pub mod tasks;
pub mod transport;

pub use config::ReceiverConfig;
pub use service::{FrameCallback, StreamingService};
pub use tasks::{Producer, TaskKey, TaskParams, TaskTable};
