//! Classifier module
//!
//! Turns raw per-frame detection events into semantically distinct
//! motion/jitter/light events, tolerating brief detector noise without
//! either missing real motion or over-reporting spurious changes.
//!
//! This module contains:
//! - `MotionClassifier`: the per-session temporal state machine
//! - `ClassifierConfig`: the tunable tie-breaking thresholds
//! - `MotionEvent` / `Detection`: the emitted event types

pub mod events;

pub use events::{Detection, MotionEvent};

use crate::error::{DetectError, Result};
use crate::protocol::Rect;
use tracing::debug;

/// Tunable classifier thresholds
///
/// The defaults are empirically tuned to the upstream detector's
/// false-positive rate; they encode tradeoffs, not arbitrary numbers.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    /// Consecutive changed frames required before jitter is promoted to
    /// confirmed motion
    pub confirm_threshold: u32,
    /// Consecutive still frames that close a burst with `MotionEnd`
    pub stillness_end: u32,
    /// Carry-over applies only while the current jitter run is below this
    pub carryover_max_jitter: u32,
    /// Carry-over applies only for stillness gaps shorter than this
    pub carryover_max_stillness: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confirm_threshold: 2,
            stillness_end: 3,
            carryover_max_jitter: 2,
            carryover_max_stillness: 3,
        }
    }
}

/// A raw detection result for one forwarded frame
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// Reported rectangles; `None` marks a malformed event
    pub rects: Option<Vec<Rect>>,
    /// Sequence number of the frame this result belongs to
    pub frame: u64,
    /// Timestamp the frame was forwarded, unix milliseconds
    pub timestamp_ms: u64,
}

/// Motion/jitter/light classification state machine
///
/// Driven by exactly one raw detection per forwarded frame, in send order
/// (the single-flight frame discipline guarantees ordering), so no frame
/// is ever observed out of sequence.
#[derive(Debug)]
pub struct MotionClassifier {
    config: ClassifierConfig,

    /// Consecutive frames with non-empty rectangle lists, not yet (or
    /// already) confirmed as motion
    consecutive_jitter: u32,
    /// Consecutive frames with empty rectangle lists
    consecutive_stillness: u32,
    /// Jitter run carried over an unfinished stillness gap
    previous_jitter: Option<u32>,
    /// Whether a confirmed burst is currently open
    in_burst: bool,

    /// Lifetime count of changed frames
    jitter_count: u64,
    /// Lifetime count of confirmed motion events
    motion_count: u64,
}

impl MotionClassifier {
    /// Create a classifier with the given thresholds
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            consecutive_jitter: 0,
            consecutive_stillness: 0,
            previous_jitter: None,
            in_burst: false,
            jitter_count: 0,
            motion_count: 0,
        }
    }

    /// Lifetime count of changed frames
    pub fn jitter_count(&self) -> u64 {
        self.jitter_count
    }

    /// Lifetime count of confirmed motion events
    pub fn motion_count(&self) -> u64 {
        self.motion_count
    }

    /// Process one raw detection, producing the events it triggers
    ///
    /// Fails fast with a protocol error when the rectangle list is missing;
    /// a well-behaved worker always sends one.
    pub fn update(&mut self, raw: RawDetection) -> Result<Vec<MotionEvent>> {
        let rects = raw
            .rects
            .ok_or_else(|| DetectError::protocol("detection event missing rectangle list"))?;

        if rects.is_empty() {
            Ok(self.on_stillness(raw.frame))
        } else {
            Ok(self.on_change(rects, raw.frame, raw.timestamp_ms))
        }
    }

    /// Handle a frame with detected change
    fn on_change(&mut self, rects: Vec<Rect>, frame: u64, timestamp_ms: u64) -> Vec<MotionEvent> {
        // Bridge a short quiet gap between two bursts of change so they
        // count as one continuous event rather than two separate ones.
        if self.consecutive_jitter < self.config.carryover_max_jitter
            && self.consecutive_stillness < self.config.carryover_max_stillness
        {
            if let Some(carried) = self.previous_jitter.take() {
                debug!("Carrying {} jitter frames over a short gap", carried);
                self.consecutive_jitter += carried;
            }
        }

        // A change frame ends the current stillness run.
        self.consecutive_stillness = 0;

        self.consecutive_jitter += 1;
        self.jitter_count += 1;

        let detection = Detection {
            rects,
            frame,
            timestamp_ms,
            jitter_count: self.jitter_count,
            consecutive_jitter: self.consecutive_jitter,
        };

        let mut events = vec![MotionEvent::Jitter(detection.clone())];

        if self.consecutive_jitter >= self.config.confirm_threshold {
            // Confirmed motion. No zero-coordinate check from here on.
            if !self.in_burst {
                self.in_burst = true;
                events.push(MotionEvent::MotionStart(detection.clone()));
            }
            self.motion_count += 1;
            events.push(MotionEvent::Motion(detection));
        } else if detection.rects.iter().any(Rect::has_zero_coordinate) {
            // A zero coordinate before confirmation signals a whole-frame
            // illumination change; it must not count toward motion.
            self.consecutive_jitter = self.consecutive_jitter.saturating_sub(1);
            events.push(MotionEvent::Light(detection));
        }

        events
    }

    /// Handle a frame without detected change
    fn on_stillness(&mut self, frame: u64) -> Vec<MotionEvent> {
        if self.consecutive_jitter > 0 {
            self.previous_jitter = Some(self.consecutive_jitter);
            self.consecutive_jitter = 0;
        }

        self.consecutive_stillness += 1;

        if self.consecutive_stillness == self.config.stillness_end {
            // A gap this long never bridges into the next burst.
            self.previous_jitter = None;

            if self.in_burst {
                self.in_burst = false;
                return vec![MotionEvent::MotionEnd { frame }];
            }
        }

        Vec::new()
    }
}

impl Default for MotionClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
