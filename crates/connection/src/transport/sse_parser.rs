//! Incremental `text/event-stream` parser.

use tracing::warn;

/// Room for the field name and separator on a line carrying a full-size
/// payload, e.g. `data: ` plus a trailing `\r`.
const FIELD_OVERHEAD: usize = 8;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub(crate) event: Option<String>,
    pub(crate) data: String,
}

/// Splits a byte stream into SSE frames.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere, including inside a multi-byte character.
///
/// Memory is bounded by `limit`: a line or a frame that grows past it is
/// dropped with a warning, and everything up to the next blank line is
/// skipped.
#[derive(Debug)]
pub(crate) struct SseParser {
    limit: usize,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
    /// Length of the frame's data once joined.
    data_len: usize,
    skipping: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            buffer: Vec::new(),
            scanned: 0,
            event: None,
            data: Vec::new(),
            data_len: 0,
            skipping: false,
            last_event_id: None,
        }
    }

    /// The most recent `id:` seen on this stream.
    pub(crate) fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feeds a chunk and returns every frame it completed.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if !self.skipping && self.buffer.len() > self.limit.saturating_add(FIELD_OVERHEAD) {
            warn!(
                limit = self.limit,
                buffered = self.buffer.len(),
                "SSE line exceeds message limit, skipping frame"
            );
            self.start_skipping();
        }
        if self.skipping && !self.buffer.is_empty() {
            // The rest of a skipped line is never read; one byte keeps the
            // line non-empty so its newline is not taken for a blank line.
            self.buffer.clear();
            self.buffer.push(b'-');
            self.scanned = 1;
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if self.skipping {
            if line.is_empty() {
                self.skipping = false;
            }
            return None;
        }
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.push_data(value),
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            // `retry` is ignored: reconnect timing belongs to the backoff policy.
            _ => {}
        }
        None
    }

    fn push_data(&mut self, value: &str) {
        let separator = usize::from(!self.data.is_empty());
        self.data_len += separator + value.len();
        if self.data_len > self.limit {
            warn!(
                limit = self.limit,
                size = self.data_len,
                "SSE frame exceeds message limit, skipping frame"
            );
            self.start_skipping();
            return;
        }
        self.data.push(value.to_string());
    }

    /// Drops the pending frame and ignores lines until the next blank one.
    fn start_skipping(&mut self) {
        self.skipping = true;
        self.event = None;
        self.data.clear();
        self.data_len = 0;
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}
