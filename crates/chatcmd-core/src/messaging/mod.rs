//! Outbound side of the engine: the transport port and the delivery queue.

pub mod port;
pub mod queue;
pub mod types;
