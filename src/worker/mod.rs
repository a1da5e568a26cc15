//! Worker module
//!
//! Manages the external frame-analysis process and its control protocol.
//!
//! This module contains:
//! - `WorkerChannel`: process lifecycle, request/reply correlation, event
//!   demultiplexing
//! - `WorkerConfig`: executable path, script argument, reply timeout
//! - `WorkerEvent`: unsolicited events (detection locations, stderr text)

pub mod channel;

// Re-exports for convenience
pub use channel::{WorkerChannel, WorkerConfig, WorkerEvent, DEFAULT_REPLY_TIMEOUT};
