//! Protocol module
//!
//! Wire types for the worker control protocol.
//!
//! This module contains:
//! - `Request`: outbound command serialization
//! - `WorkerMessage`: inbound line classification (reply / log / locations)
//! - `LineBuffer`: chunk reassembly for messages split across I/O reads
//! - `Rect`: a detected bounding box
//! - `StartPayload`: the session start handshake body

pub mod message;

// Re-exports for convenience
pub use message::{LineBuffer, Rect, Request, StartPayload, WorkerMessage};
