//! Transport module
//!
//! Delivers raw decoded frames to the worker over a local streaming socket
//! with explicit single-frame-in-flight backpressure.
//!
//! This module contains:
//! - `FrameTransport`: the per-session Unix-socket endpoint and gate
//! - `FrameSource`: the upstream decoded-frame seam
//! - `FrameGeometry`: probed frame dimensions and chunk size

pub mod socket;
pub mod source;

// Re-exports for convenience
pub use socket::{FrameTransport, SentFrame};
pub use source::{FrameGeometry, FrameSource};
