//! Session module
//!
//! Composes the worker channel, frame transport, and motion classifier for
//! one detection session over one input stream. Owns the start handshake
//! and session teardown.

use crate::classifier::{ClassifierConfig, MotionClassifier, MotionEvent, RawDetection};
use crate::error::{DetectError, Result};
use crate::protocol::StartPayload;
use crate::transport::{FrameSource, FrameTransport};
use crate::worker::{WorkerChannel, WorkerConfig, WorkerEvent};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffered capacity of the public event stream
const SESSION_EVENT_CAPACITY: usize = 256;

/// Configuration for one detection session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Worker process settings
    pub worker: WorkerConfig,
    /// Classifier thresholds
    pub classifier: ClassifierConfig,
    /// Directory for the per-session frame socket; system temp dir when
    /// unset
    pub socket_dir: Option<std::path::PathBuf>,
}

/// Events delivered on the public session stream
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A classified motion/jitter/light event
    Classified(MotionEvent),

    /// The session finished: upstream ended or it was destroyed
    End,

    /// A non-fatal error: worker stderr text or an upstream stream failure
    Error(String),
}

/// One detection session: one stream, one worker process, one socket
///
/// Created idle; `detect` attaches the single stream this session will
/// ever process.
pub struct MotionSession {
    config: SessionConfig,
    id: String,
    active: bool,
}

impl MotionSession {
    /// Create a new idle session
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            id: Uuid::new_v4().to_string(),
            active: false,
        }
    }

    /// Unique session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attach a decoded-frame stream and start detecting
    ///
    /// Performs the start handshake and spawns the session tasks. Only one
    /// stream may ever be attached; a second attempt fails with
    /// `AlreadyActive`.
    pub async fn detect<S>(&mut self, mut source: S) -> Result<SessionHandle>
    where
        S: FrameSource + 'static,
    {
        if self.active {
            return Err(DetectError::AlreadyActive);
        }
        self.active = true;

        let channel = WorkerChannel::new(self.config.worker.clone());

        // Subscribe before the process starts so early stderr output and
        // the first detection event cannot be missed.
        let worker_events = channel.subscribe();

        channel.start()?;

        let geometry = source.probe().await?;
        debug!(
            "Session {}: geometry {}x{}x{} ({} bytes/frame)",
            self.id, geometry.width, geometry.height, geometry.depth, geometry.chunk_size
        );

        let socket_dir = self
            .config
            .socket_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let socket_path = socket_dir.join(format!("motion_stream_{}", self.id));

        let payload = StartPayload {
            path: socket_path.to_string_lossy().into_owned(),
            width: geometry.width,
            height: geometry.height,
            depth: geometry.depth,
            chunk_size: geometry.chunk_size,
        };
        let payload = serde_json::to_value(&payload)?;

        let transport = match FrameTransport::bind(&socket_path).await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                channel.destroy().await;
                return Err(e);
            }
        };

        let handshake_started = Instant::now();

        let start_reply = match channel.send("start", payload).await {
            Ok(reply) => reply,
            Err(e) => {
                transport.close().await;
                channel.destroy().await;
                return Err(e);
            }
        };

        let handshake_duration = handshake_started.elapsed();
        info!(
            "Session {} started in {:?} on {}",
            self.id,
            handshake_duration,
            socket_path.display()
        );

        // The worker is now waiting for its first frame.
        transport.signal_ready();

        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);

        let inner = Arc::new(SessionInner {
            id: self.id.clone(),
            transport: Arc::clone(&transport),
            channel,
            events_tx: events_tx.clone(),
            ended: AtomicBool::new(false),
        });

        // Pump task: upstream frames into the transport.
        let pump_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            Self::pump_task(source, pump_inner).await;
        });

        // Classify task: worker detections into public events.
        let classifier = MotionClassifier::new(self.config.classifier);
        let classify_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            Self::classify_task(worker_events, classifier, classify_inner).await;
        });

        Ok(SessionHandle {
            inner,
            events_rx,
            start_reply,
            handshake_duration,
        })
    }

    /// Consume the upstream stream, offering each frame to the transport
    async fn pump_task<S: FrameSource>(mut source: S, inner: Arc<SessionInner>) {
        loop {
            match source.next_frame().await {
                Ok(Some(frame)) => {
                    if let Err(e) = inner.transport.offer_frame(&frame).await {
                        warn!("Session {}: frame forward failed: {}", inner.id, e);
                        inner.report_error(e.to_string()).await;
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Session {}: upstream ended", inner.id);
                    break;
                }
                Err(e) => {
                    // Stream-level failures are events, not panics.
                    inner.report_error(e.to_string()).await;
                    break;
                }
            }
        }

        inner.shutdown().await;
    }

    /// Turn raw worker detections into classified public events
    async fn classify_task(
        mut worker_events: broadcast::Receiver<WorkerEvent>,
        mut classifier: MotionClassifier,
        inner: Arc<SessionInner>,
    ) {
        loop {
            match worker_events.recv().await {
                Ok(WorkerEvent::Locations(locs)) => {
                    let sent = inner.transport.last_sent();
                    let raw = RawDetection {
                        rects: locs,
                        frame: sent.map(|s| s.frame).unwrap_or(0),
                        timestamp_ms: sent.map(|s| s.timestamp_ms).unwrap_or(0),
                    };

                    match classifier.update(raw) {
                        Ok(events) => {
                            for event in events {
                                let _ = inner
                                    .events_tx
                                    .send(SessionEvent::Classified(event))
                                    .await;
                            }
                        }
                        Err(e) => {
                            inner.report_error(e.to_string()).await;
                        }
                    }

                    // The worker only analyzes one frame at a time: having
                    // reported this result, it is waiting for the next.
                    inner.transport.signal_ready();
                }
                Ok(WorkerEvent::Stderr(text)) => {
                    inner.report_error(text).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Session {}: classify task lagged {} events", inner.id, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        debug!("Session {}: classify task finished", inner.id);
    }
}

/// Shared state behind a running session
struct SessionInner {
    id: String,
    transport: Arc<FrameTransport>,
    channel: WorkerChannel,
    events_tx: mpsc::Sender<SessionEvent>,
    ended: AtomicBool,
}

impl SessionInner {
    /// Forward a non-fatal error on the event stream
    async fn report_error(&self, message: String) {
        let _ = self.events_tx.send(SessionEvent::Error(message)).await;
    }

    /// Tear the session down, exactly once
    ///
    /// Ordering matters on every exit path: close the frame endpoint,
    /// terminate the worker (which fails all pending requests with
    /// `ChannelClosed`), then emit the final `End` event.
    async fn shutdown(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            "Session {} ending: {} frames seen, {} forwarded",
            self.id,
            self.transport.frames_seen(),
            self.transport.frames_sent()
        );

        self.transport.close().await;
        self.channel.destroy().await;
        let _ = self.events_tx.send(SessionEvent::End).await;
    }
}

/// Handle to a running detection session
///
/// Exposes the public event stream and early cancellation. Dropping the
/// handle without calling `destroy` leaves teardown to the pump task's
/// end-of-stream path (the worker process itself is killed on drop).
pub struct SessionHandle {
    inner: Arc<SessionInner>,
    events_rx: mpsc::Receiver<SessionEvent>,
    start_reply: Value,
    handshake_duration: Duration,
}

impl SessionHandle {
    /// Receive the next session event; `None` after `End` was delivered
    /// and the stream drained
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// The worker's reply payload to the start handshake
    pub fn start_reply(&self) -> &Value {
        &self.start_reply
    }

    /// How long the start handshake took
    pub fn handshake_duration(&self) -> Duration {
        self.handshake_duration
    }

    /// Total frames observed on the upstream stream
    pub fn frames_seen(&self) -> u64 {
        self.inner.transport.frames_seen()
    }

    /// Total frames forwarded to the worker
    pub fn frames_sent(&self) -> u64 {
        self.inner.transport.frames_sent()
    }

    /// Cancel the session early
    ///
    /// Closes the frame endpoint, terminates the worker, and fails all
    /// pending control requests. The `End` event is still delivered,
    /// exactly once.
    pub async fn destroy(&self) {
        self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameGeometry;
    use async_trait::async_trait;

    /// Source that yields a fixed number of blank frames
    struct CannedSource {
        geometry: FrameGeometry,
        remaining: usize,
    }

    #[async_trait]
    impl FrameSource for CannedSource {
        async fn probe(&mut self) -> Result<FrameGeometry> {
            Ok(self.geometry)
        }

        async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(vec![0u8; self.geometry.chunk_size]))
        }
    }

    fn unlaunchable_config() -> SessionConfig {
        SessionConfig {
            worker: WorkerConfig {
                executable: std::path::PathBuf::from("/nonexistent/interpreter"),
                ..WorkerConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_detect_fails_with_launch_error() {
        let mut session = MotionSession::new(unlaunchable_config());
        let source = CannedSource {
            geometry: FrameGeometry::new(4, 4, 1),
            remaining: 0,
        };

        match session.detect(source).await {
            Err(DetectError::Launch(_)) => {}
            other => panic!("expected launch error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_second_stream_is_already_active() {
        let mut session = MotionSession::new(unlaunchable_config());

        // Even a failed attach marks the session as used.
        let source = CannedSource {
            geometry: FrameGeometry::new(4, 4, 1),
            remaining: 0,
        };
        let _ = session.detect(source).await;

        let source = CannedSource {
            geometry: FrameGeometry::new(4, 4, 1),
            remaining: 0,
        };
        match session.detect(source).await {
            Err(DetectError::AlreadyActive) => {}
            other => panic!("expected already active, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = MotionSession::new(SessionConfig::default());
        let b = MotionSession::new(SessionConfig::default());
        assert_ne!(a.id(), b.id());
    }
}
