//! Frame source seam
//!
//! The decoded-frame stream is produced by an external media-conversion
//! pipeline; this trait is its interface boundary. Implementations hand
//! over fixed-size raw grayscale frames plus the geometry needed for the
//! session start handshake.

use crate::error::Result;
use async_trait::async_trait;

/// Frame geometry learned by probing the decoded stream
///
/// Sent once to the worker in the `start` handshake so it knows how many
/// bytes make up one frame on the transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per pixel (1 for grayscale)
    pub depth: u32,
    /// Fixed frame size in bytes
    pub chunk_size: usize,
}

impl FrameGeometry {
    /// Create a geometry record, deriving the chunk size
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
            chunk_size: width as usize * height as usize * depth as usize,
        }
    }
}

/// A stream of fixed-size raw decoded frames
///
/// `probe` must complete before the first `next_frame` call; the session
/// orchestrator uses it to build the start handshake payload.
#[async_trait]
pub trait FrameSource: Send {
    /// Learn the frame geometry of the stream
    async fn probe(&mut self) -> Result<FrameGeometry>;

    /// Produce the next frame, or `None` at end of stream
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_chunk_size() {
        let geometry = FrameGeometry::new(640, 480, 1);
        assert_eq!(geometry.chunk_size, 640 * 480);

        let geometry = FrameGeometry::new(320, 240, 3);
        assert_eq!(geometry.chunk_size, 320 * 240 * 3);
    }
}
