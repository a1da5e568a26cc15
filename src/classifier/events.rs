//! Classifier Event Types
//!
//! This module defines the events emitted by the motion classifier.

use crate::protocol::Rect;

/// Payload attached to classifier events
///
/// Immutable once emitted: the originating rectangles, the frame they
/// belong to, and the running counters at emission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Rectangles reported by the worker for this frame
    pub rects: Vec<Rect>,
    /// Sequence number of the forwarded frame
    pub frame: u64,
    /// Forwarding timestamp in unix milliseconds
    pub timestamp_ms: u64,
    /// Lifetime count of changed frames
    pub jitter_count: u64,
    /// Length of the current jitter run, carry-over included
    pub consecutive_jitter: u32,
}

/// Events emitted by the motion classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionEvent {
    /// Raw, unconfirmed change on a single frame
    Jitter(Detection),

    /// Confirmed motion on this frame
    Motion(Detection),

    /// First confirmed frame of a new burst
    MotionStart(Detection),

    /// The burst ended: configured run of still frames observed
    MotionEnd {
        /// Frame on which the burst was declared over
        frame: u64,
    },

    /// Whole-frame illumination change, reclassified away from motion
    Light(Detection),
}

impl MotionEvent {
    /// Wire-style name of this event
    pub fn kind(&self) -> &'static str {
        match self {
            MotionEvent::Jitter(_) => "jitter",
            MotionEvent::Motion(_) => "motion",
            MotionEvent::MotionStart(_) => "motion_start",
            MotionEvent::MotionEnd { .. } => "motion_end",
            MotionEvent::Light(_) => "light",
        }
    }

    /// Check if this event reports confirmed motion
    pub fn is_motion(&self) -> bool {
        matches!(self, MotionEvent::Motion(_) | MotionEvent::MotionStart(_))
    }

    /// Get the detection payload, if this event carries one
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            MotionEvent::Jitter(d)
            | MotionEvent::Motion(d)
            | MotionEvent::MotionStart(d)
            | MotionEvent::Light(d) => Some(d),
            MotionEvent::MotionEnd { .. } => None,
        }
    }
}
