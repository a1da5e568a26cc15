//! motion-detect-core
//!
//! Coordinates an external frame-analysis worker to classify motion in a
//! video stream, distinguishing genuine movement from camera jitter and
//! global illumination changes.
//!
//! ## Architecture
//!
//! One detection session binds one decoded-frame stream to one worker
//! process. Control messages travel as newline-delimited JSON over the
//! worker's standard streams; raw frames travel over a per-session Unix
//! socket, one frame in flight at a time.
//!
//! ### Modules
//!
//! - `protocol`: Control-protocol wire types and chunk reassembly
//! - `worker`: Worker process channel (spawn, correlate, demultiplex)
//! - `transport`: Frame socket with single-frame backpressure
//! - `classifier`: Motion/jitter/light state machine
//! - `session`: Session orchestration and the public event stream
//!
//! ## Example
//!
//! ```rust,no_run
//! use motion_detect_core::{MotionSession, SessionConfig, SessionEvent};
//! use motion_detect_core::transport::FrameSource;
//!
//! async fn run(source: impl FrameSource + 'static) -> motion_detect_core::Result<()> {
//!     let mut session = MotionSession::new(SessionConfig::default());
//!     let mut handle = session.detect(source).await?;
//!
//!     while let Some(event) = handle.recv().await {
//!         match event {
//!             SessionEvent::Classified(event) => println!("{}", event.kind()),
//!             SessionEvent::Error(message) => eprintln!("worker: {}", message),
//!             SessionEvent::End => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Re-export commonly used types
pub use classifier::{ClassifierConfig, Detection, MotionClassifier, MotionEvent};
pub use error::{DetectError, Result};
pub use protocol::Rect;
pub use session::{MotionSession, SessionConfig, SessionEvent, SessionHandle};
pub use worker::{WorkerChannel, WorkerConfig, WorkerEvent};

// Public modules
pub mod classifier;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod worker;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
