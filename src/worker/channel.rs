//! Worker Channel
//!
//! Owns one external analysis process and its line-based JSON control
//! protocol: spawning, request/reply correlation by generated id, and
//! demultiplexing of unsolicited events to subscribers.
//!
//! Control messages travel over the worker's standard streams; raw frame
//! bytes never do — those go over the frame transport socket.

use crate::error::{DetectError, Result};
use crate::protocol::{LineBuffer, Rect, Request, WorkerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default reply timeout for control requests
///
/// A worker that never replies would otherwise leave its pending entry
/// alive until channel teardown. Set `reply_timeout` to `None` to restore
/// the unguarded behavior.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Broadcast capacity for unsolicited worker events
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for the worker channel
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interpreter or executable to spawn
    pub executable: PathBuf,
    /// Analysis script passed as the fixed argument
    pub script: PathBuf,
    /// Extra arguments placed before the script (e.g. `-u` for unbuffered)
    pub args: Vec<String>,
    /// How long `send` waits for a matching reply; `None` waits forever
    pub reply_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("python3"),
            script: PathBuf::from("python/main.py"),
            args: vec!["-u".to_string()],
            reply_timeout: Some(DEFAULT_REPLY_TIMEOUT),
        }
    }
}

/// Unsolicited events emitted by the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Detection rectangles for the last forwarded frame
    ///
    /// `None` means the worker sent a `locs` message without a rectangle
    /// list — the classifier treats that as a protocol violation.
    Locations(Option<Vec<Rect>>),

    /// Text the worker wrote to its error stream, forwarded verbatim
    Stderr(String),
}

/// Pending request table shared between `send` and the reader task
///
/// The one piece of channel state mutated from two directions: issuing a
/// request inserts, a matching reply (or teardown) removes. A std mutex is
/// enough since no lock is held across an await point.
#[derive(Default)]
struct PendingMap {
    inner: Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>,
}

impl PendingMap {
    /// Register a pending request, returning the completion receiver
    fn register(&self, id: &str) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("pending map poisoned")
            .insert(id.to_string(), tx);
        rx
    }

    /// Remove a pending entry without completing it
    fn discard(&self, id: &str) {
        self.inner.lock().expect("pending map poisoned").remove(id);
    }

    /// Complete the entry matching `id`, if any
    ///
    /// Replies with unknown ids are ignored: the entry may have timed out,
    /// or the worker may be confused. Never a crash.
    fn complete(&self, id: &str, outcome: Result<Value>) {
        let entry = self.inner.lock().expect("pending map poisoned").remove(id);
        match entry {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!("Ignoring reply with unknown id {}", id),
        }
    }

    /// Fail every pending request with a channel-closed error
    fn fail_all(&self) {
        let entries: Vec<_> = self
            .inner
            .lock()
            .expect("pending map poisoned")
            .drain()
            .collect();
        for (id, tx) in entries {
            debug!("Failing pending request {} on teardown", id);
            let _ = tx.send(Err(DetectError::ChannelClosed));
        }
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("pending map poisoned")
            .contains_key(id)
    }
}

/// Channel to one external analysis worker
///
/// Lifecycle: `start()` spawns the process and its reader tasks, `send()`
/// issues correlated requests, `subscribe()` taps the unsolicited event
/// stream, `destroy()` kills the process and fails everything in flight.
/// `start` and `destroy` take `&self`: teardown must be callable while
/// requests are in flight.
pub struct WorkerChannel {
    config: WorkerConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<Arc<tokio::sync::Mutex<ChildStdin>>>>,
    pending: Arc<PendingMap>,
    events_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerChannel {
    /// Create a new channel; the process is not spawned until `start()`
    pub fn new(config: WorkerConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(PendingMap::default()),
            events_tx,
        }
    }

    /// Check whether the worker process is currently running
    pub fn is_started(&self) -> bool {
        self.child.lock().expect("child poisoned").is_some()
    }

    /// Launch the worker process
    ///
    /// Idempotent: calls after the first are no-ops. Spawns the stdout and
    /// stderr reader tasks. The child is killed if the channel is dropped.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.child.lock().expect("child poisoned");
        if slot.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.config.executable)
            .args(&self.config.args)
            .arg(&self.config.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DetectError::launch(format!(
                    "failed to spawn {}: {}",
                    self.config.executable.display(),
                    e
                ))
            })?;

        info!(
            "Worker started: {} {}",
            self.config.executable.display(),
            self.config.script.display()
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DetectError::launch("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DetectError::launch("worker stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DetectError::launch("worker stderr not captured"))?;

        *self.stdin.lock().expect("stdin poisoned") =
            Some(Arc::new(tokio::sync::Mutex::new(stdin)));

        // Control stream reader
        let pending = Arc::clone(&self.pending);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buffer = LineBuffer::new();
            let mut chunk = [0u8; 4096];

            loop {
                let n = match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        error!("Worker stdout read failed: {}", e);
                        break;
                    }
                };

                for parsed in buffer.feed(&chunk[..n]) {
                    match parsed {
                        Ok(msg) => Self::dispatch(&pending, &events_tx, msg),
                        Err(e) => warn!("Dropping malformed control line: {}", e),
                    }
                }
            }

            debug!("Worker stdout closed");
            pending.fail_all();
        });

        // Error stream reader: forwarded verbatim, never terminates the
        // channel by itself.
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut stderr = stderr;
            let mut chunk = [0u8; 4096];

            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&chunk[..n]).to_string();
                        let _ = events_tx.send(WorkerEvent::Stderr(text));
                    }
                }
            }
        });

        *slot = Some(child);
        Ok(())
    }

    /// Dispatch one parsed control message by shape
    fn dispatch(
        pending: &PendingMap,
        events_tx: &broadcast::Sender<WorkerEvent>,
        msg: WorkerMessage,
    ) {
        match msg {
            WorkerMessage::Reply { id, result, error } => match error {
                Some(text) => pending.complete(&id, Err(DetectError::Worker(text))),
                None => pending.complete(&id, Ok(result.unwrap_or(Value::Null))),
            },
            WorkerMessage::Log { log } => debug!("Worker log: {}", log),
            WorkerMessage::Locations { locs } => {
                // Forwarded immediately, never buffered; lost if nobody
                // is subscribed yet.
                let _ = events_tx.send(WorkerEvent::Locations(locs));
            }
        }
    }

    /// Send a command and await the matching reply
    ///
    /// Resolves with the reply's `result` payload, or `Worker` when the
    /// reply carries an error. Subject to the configured `reply_timeout`.
    pub async fn send(&self, command: &str, payload: Value) -> Result<Value> {
        let stdin = self
            .stdin
            .lock()
            .expect("stdin poisoned")
            .clone()
            .ok_or(DetectError::ChannelClosed)?;

        let id = Uuid::new_v4().to_string();
        let rx = self.pending.register(&id);

        let line = Request::new(command, &id, payload).to_line()?;
        debug!("Sending {} request {}", command, id);

        {
            let mut stdin = stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.discard(&id);
                return Err(e.into());
            }
        }

        match self.config.reply_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(outcome) => outcome.unwrap_or(Err(DetectError::ChannelClosed)),
                Err(_) => {
                    self.pending.discard(&id);
                    warn!("Request {} timed out after {:?}", id, limit);
                    Err(DetectError::Timeout)
                }
            },
            None => rx.await.unwrap_or(Err(DetectError::ChannelClosed)),
        }
    }

    /// Subscribe to unsolicited worker events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events_tx.subscribe()
    }

    /// Terminate the worker process and fail everything in flight
    ///
    /// Safe to call more than once and while requests are pending; every
    /// pending request resolves with `ChannelClosed`.
    pub async fn destroy(&self) {
        self.stdin.lock().expect("stdin poisoned").take();

        let child = self.child.lock().expect("child poisoned").take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill worker: {}", e);
            }
            info!("Worker terminated");
        }

        self.pending.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_channel() -> WorkerChannel {
        WorkerChannel::new(WorkerConfig::default())
    }

    #[tokio::test]
    async fn test_reply_completes_matching_pending_request() {
        let channel = test_channel();
        let rx = channel.pending.register("req-1");

        WorkerChannel::dispatch(
            &channel.pending,
            &channel.events_tx,
            WorkerMessage::Reply {
                id: "req-1".to_string(),
                result: Some(json!({"ok": true})),
                error: None,
            },
        );

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome["ok"], true);
    }

    #[tokio::test]
    async fn test_error_reply_rejects_pending_request() {
        let channel = test_channel();
        let rx = channel.pending.register("req-2");

        WorkerChannel::dispatch(
            &channel.pending,
            &channel.events_tx,
            WorkerMessage::Reply {
                id: "req-2".to_string(),
                result: None,
                error: Some("bad command".to_string()),
            },
        );

        match rx.await.unwrap() {
            Err(DetectError::Worker(text)) => assert_eq!(text, "bad command"),
            other => panic!("expected worker error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_reply_id_is_ignored() {
        let channel = test_channel();
        let rx = channel.pending.register("known");

        WorkerChannel::dispatch(
            &channel.pending,
            &channel.events_tx,
            WorkerMessage::Reply {
                id: "unknown".to_string(),
                result: Some(Value::Null),
                error: None,
            },
        );

        // The known request is still pending afterwards.
        assert!(channel.pending.contains("known"));
        drop(rx);
    }

    #[tokio::test]
    async fn test_locations_are_broadcast_to_subscribers() {
        let channel = test_channel();
        let mut rx = channel.subscribe();

        WorkerChannel::dispatch(
            &channel.pending,
            &channel.events_tx,
            WorkerMessage::Locations {
                locs: Some(vec![Rect(1, 2, 3, 4)]),
            },
        );

        match rx.recv().await.unwrap() {
            WorkerEvent::Locations(Some(locs)) => assert_eq!(locs, vec![Rect(1, 2, 3, 4)]),
            other => panic!("expected locations, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_fails_all_pending_requests() {
        let channel = test_channel();
        let rx1 = channel.pending.register("a");
        let rx2 = channel.pending.register("b");

        channel.destroy().await;

        assert!(matches!(rx1.await.unwrap(), Err(DetectError::ChannelClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(DetectError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_send_without_start_is_channel_closed() {
        let channel = test_channel();
        let outcome = channel.send("start", json!({})).await;
        assert!(matches!(outcome, Err(DetectError::ChannelClosed)));
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.executable, PathBuf::from("python3"));
        assert_eq!(config.args, vec!["-u".to_string()]);
        assert_eq!(config.reply_timeout, Some(DEFAULT_REPLY_TIMEOUT));
    }
}
