//! Frame transport socket
//!
//! One Unix-domain listening endpoint per session. The worker connects as
//! the single client; raw frames are written one at a time, gated by the
//! "worker is waiting for the next frame" flag. Frames arriving while the
//! worker is busy are dropped, not queued — that bounds memory use and
//! keeps detection latency low at the cost of admitted frame loss under
//! sustained overload.

use crate::error::{DetectError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bookkeeping for the most recently forwarded frame
///
/// Attached by the classifier to the corresponding detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    /// Sequence number of the frame (1-based, counted over all observed
    /// frames, forwarded or not)
    pub frame: u64,
    /// Forwarding timestamp in unix milliseconds
    pub timestamp_ms: u64,
}

/// Per-session frame endpoint with single-frame-in-flight backpressure
pub struct FrameTransport {
    path: PathBuf,
    ready: Arc<AtomicBool>,
    client: Arc<tokio::sync::Mutex<Option<UnixStream>>>,
    frames_seen: AtomicU64,
    frames_sent: AtomicU64,
    last_sent: Mutex<Option<SentFrame>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl FrameTransport {
    /// Bind the listening endpoint and start accepting
    ///
    /// Exactly one inbound connection is kept; any later connection
    /// attempt is dropped immediately.
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let listener = UnixListener::bind(&path).map_err(|e| {
            DetectError::transport(format!("failed to bind {}: {}", path.display(), e))
        })?;

        info!("Frame transport listening on {}", path.display());

        let client = Arc::new(tokio::sync::Mutex::new(None::<UnixStream>));
        let client_slot = Arc::clone(&client);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let mut slot = client_slot.lock().await;
                        if slot.is_none() {
                            debug!("Worker connected to frame transport");
                            *slot = Some(stream);
                        } else {
                            warn!("Discarding extra frame transport connection");
                        }
                    }
                    Err(e) => {
                        debug!("Frame transport accept ended: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            path,
            ready: Arc::new(AtomicBool::new(false)),
            client,
            frames_seen: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            last_sent: Mutex::new(None),
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Socket path the worker must connect to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the worker as waiting for the next frame
    pub fn signal_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Check the backpressure gate without consuming it
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Offer one frame for forwarding
    ///
    /// Counts every frame observed. Forwards only when a client is
    /// connected and the ready flag was set; the flag is consumed
    /// atomically so at most one frame is in flight per readiness signal.
    /// Returns whether the frame was actually forwarded.
    pub async fn offer_frame(&self, chunk: &[u8]) -> Result<bool> {
        let seq = self.frames_seen.fetch_add(1, Ordering::SeqCst) + 1;

        let mut slot = self.client.lock().await;
        let stream = match slot.as_mut() {
            Some(stream) => stream,
            None => return Ok(false),
        };

        if !self.ready.swap(false, Ordering::SeqCst) {
            // Worker still busy: drop, don't queue.
            return Ok(false);
        }

        stream
            .write_all(chunk)
            .await
            .map_err(|e| DetectError::transport(format!("frame write failed: {}", e)))?;

        // Bookkeeping covers delivered frames only; a failed write must not
        // leave the record pointing at a frame the worker never saw.
        let sent = SentFrame {
            frame: seq,
            timestamp_ms: unix_millis(),
        };
        *self.last_sent.lock().expect("last_sent poisoned") = Some(sent);
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Sequence number and timestamp of the last forwarded frame
    pub fn last_sent(&self) -> Option<SentFrame> {
        *self.last_sent.lock().expect("last_sent poisoned")
    }

    /// Total frames observed on the upstream stream
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::SeqCst)
    }

    /// Total frames forwarded to the worker
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    /// Close the endpoint and remove the socket file
    ///
    /// Idempotent; runs on every session exit path.
    pub async fn close(&self) {
        if let Some(task) = self.accept_task.lock().expect("accept task poisoned").take() {
            task.abort();
        }

        self.client.lock().await.take();

        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }

        debug!("Frame transport closed");
    }
}

/// Current time as unix milliseconds
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
