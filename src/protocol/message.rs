//! Control protocol messages
//!
//! The worker speaks newline-delimited JSON over its standard streams.
//! Requests carry a `command` and a generated `id`; replies echo the `id`
//! with either a `result` or an `error`. The worker also emits unsolicited
//! `log` lines and `locs` detection events.
//!
//! ## Wire format
//!
//! ```text
//! -> {"command": "start", "id": "<uuid>", "path": "...", "width": 640, ...}
//! <- {"id": "<uuid>", "result": {}}
//! <- {"log": "Chunksize 307200 - 640x480"}
//! <- {"locs": [[12, 40, 200, 310]]}
//! ```

use crate::error::{DetectError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A detected bounding box, reported by the worker as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect(pub i64, pub i64, pub i64, pub i64);

impl Rect {
    /// Check whether any boundary value is exactly zero
    ///
    /// A zero coordinate is the heuristic signal for a whole-frame
    /// illumination change rather than localized motion.
    pub fn has_zero_coordinate(&self) -> bool {
        self.0 == 0 || self.1 == 0 || self.2 == 0 || self.3 == 0
    }
}

/// Payload of the `start` handshake command
///
/// Tells the worker where to connect for raw frames and what geometry
/// to expect on that socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    /// Frame transport socket path the worker must connect to
    pub path: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per pixel (1 for grayscale)
    pub depth: u32,
    /// Fixed frame size in bytes (width * height * depth)
    pub chunk_size: usize,
}

/// An outbound request line
///
/// Serialized as `{"command": ..., "id": ..., ...payload}` — payload fields
/// are flattened into the top-level object.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Command name
    pub command: String,
    /// Correlation id, generated per request
    pub id: String,
    /// Command-specific fields, flattened onto the object
    #[serde(flatten)]
    pub payload: Value,
}

impl Request {
    /// Create a new request
    pub fn new(command: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        Self {
            command: command.into(),
            id: id.into(),
            payload,
        }
    }

    /// Serialize as a single newline-terminated line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// An inbound message from the worker, classified by shape
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    /// A reply to a request, matched by `id`
    Reply {
        /// Correlation id of the originating request
        id: String,
        /// Success payload
        #[serde(default)]
        result: Option<Value>,
        /// Worker-reported failure text
        #[serde(default)]
        error: Option<String>,
    },

    /// An informational log line
    Log {
        /// Log text
        log: String,
    },

    /// An unsolicited detection event
    ///
    /// `None` means the field was present but null — a malformed event the
    /// classifier rejects rather than guessing.
    Locations {
        /// Detected bounding boxes for the last forwarded frame
        locs: Option<Vec<Rect>>,
    },
}

impl WorkerMessage {
    /// Parse one complete protocol line
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| DetectError::protocol(format!("unparseable line {:?}: {}", line, e)))
    }
}

/// Reassembly buffer for the worker's line-oriented output
///
/// The worker's stdout arrives in arbitrary read-sized chunks, so a JSON
/// line can be split at any byte boundary — including inside a multi-byte
/// UTF-8 character. The buffer therefore works on raw bytes and only
/// decodes a line once its terminator has arrived. A terminated line that
/// still fails to decode or parse can never be completed further, so it
/// surfaces as a protocol error and is dropped by the caller — the channel
/// itself keeps going.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of output, yielding every message completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<WorkerMessage>> {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut rest = bytes.as_slice();

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];

            match std::str::from_utf8(line) {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        out.push(WorkerMessage::parse(text));
                    }
                }
                Err(e) => out.push(Err(DetectError::protocol(format!(
                    "control line is not valid utf-8: {}",
                    e
                )))),
            }
        }

        // Unterminated remainder becomes the new partial buffer
        self.partial = rest.to_vec();
        out
    }

    /// Number of buffered bytes awaiting a line terminator
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line_shape() {
        let req = Request::new("start", "abc-123", json!({"width": 640, "height": 480}));
        let line = req.to_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["command"], "start");
        assert_eq!(value["id"], "abc-123");
        // Payload fields are flattened, not nested
        assert_eq!(value["width"], 640);
        assert_eq!(value["height"], 480);
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_parse_reply_with_result() {
        let msg = WorkerMessage::parse(r#"{"id": "x1", "result": {"starting": true}}"#).unwrap();
        match msg {
            WorkerMessage::Reply { id, result, error } => {
                assert_eq!(id, "x1");
                assert_eq!(result.unwrap()["starting"], true);
                assert!(error.is_none());
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_reply_with_error() {
        let msg = WorkerMessage::parse(r#"{"id": "x2", "error": "no such command"}"#).unwrap();
        match msg {
            WorkerMessage::Reply { id, error, .. } => {
                assert_eq!(id, "x2");
                assert_eq!(error.unwrap(), "no such command");
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_log_line() {
        let msg = WorkerMessage::parse(r#"{"log": "connecting"}"#).unwrap();
        assert!(matches!(msg, WorkerMessage::Log { .. }));
    }

    #[test]
    fn test_parse_locations() {
        let msg = WorkerMessage::parse(r#"{"locs": [[1, 2, 3, 4], [0, 5, 6, 7]]}"#).unwrap();
        match msg {
            WorkerMessage::Locations { locs } => {
                let locs = locs.unwrap();
                assert_eq!(locs.len(), 2);
                assert_eq!(locs[0], Rect(1, 2, 3, 4));
                assert!(locs[1].has_zero_coordinate());
                assert!(!locs[0].has_zero_coordinate());
            }
            other => panic!("expected locations, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_null_locations() {
        let msg = WorkerMessage::parse(r#"{"locs": null}"#).unwrap();
        match msg {
            WorkerMessage::Locations { locs } => assert!(locs.is_none()),
            other => panic!("expected locations, got {:?}", other),
        }
    }

    #[test]
    fn test_feed_whole_lines() {
        let mut buf = LineBuffer::new();
        let msgs = buf.feed(b"{\"log\": \"a\"}\n{\"log\": \"b\"}\n");
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.is_ok()));
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_feed_split_at_arbitrary_boundary() {
        let line = b"{\"locs\": [[10, 20, 30, 40]]}\n";

        // Splitting at every possible byte boundary must parse identically
        // to the whole delivery.
        for split in 1..line.len() {
            let mut buf = LineBuffer::new();
            let mut msgs = buf.feed(&line[..split]);
            msgs.extend(buf.feed(&line[split..]));

            assert_eq!(msgs.len(), 1, "split at {}", split);
            match msgs.pop().unwrap().unwrap() {
                WorkerMessage::Locations { locs } => {
                    assert_eq!(locs.unwrap(), vec![Rect(10, 20, 30, 40)]);
                }
                other => panic!("expected locations, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_feed_split_inside_multibyte_character() {
        // "café" is four characters but five bytes; every split point must
        // reassemble the accented character intact, including the one that
        // falls between its two bytes.
        let line = "{\"log\": \"café\"}\n".as_bytes();

        for split in 1..line.len() {
            let mut buf = LineBuffer::new();
            let mut msgs = buf.feed(&line[..split]);
            msgs.extend(buf.feed(&line[split..]));

            assert_eq!(msgs.len(), 1, "split at {}", split);
            match msgs.pop().unwrap().unwrap() {
                WorkerMessage::Log { log } => assert_eq!(log, "café", "split at {}", split),
                other => panic!("expected log, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_feed_partial_then_more_lines() {
        let mut buf = LineBuffer::new();

        let msgs = buf.feed(b"{\"log\": \"first\"}\n{\"id\": \"q");
        assert_eq!(msgs.len(), 1);
        assert!(buf.pending_len() > 0);

        let msgs = buf.feed(b"7\", \"result\": {}}\n");
        assert_eq!(msgs.len(), 1);
        match msgs.into_iter().next().unwrap().unwrap() {
            WorkerMessage::Reply { id, .. } => assert_eq!(id, "q7"),
            other => panic!("expected reply, got {:?}", other),
        }
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_feed_terminated_garbage_is_error_not_fatal() {
        let mut buf = LineBuffer::new();
        let msgs = buf.feed(b"not json at all\n{\"log\": \"after\"}\n");

        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].is_err());
        assert!(msgs[1].is_ok());
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_feed_invalid_utf8_line_is_error_not_fatal() {
        let mut buf = LineBuffer::new();
        let msgs = buf.feed(b"\xff\xfe\n{\"log\": \"after\"}\n");

        assert_eq!(msgs.len(), 2);
        assert!(matches!(&msgs[0], Err(DetectError::Protocol(_))));
        assert!(msgs[1].is_ok());
    }

    #[test]
    fn test_feed_skips_blank_lines() {
        let mut buf = LineBuffer::new();
        let msgs = buf.feed(b"\n\n{\"log\": \"x\"}\n\n");
        assert_eq!(msgs.len(), 1);
    }
}
