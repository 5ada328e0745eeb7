//! Incremental `text/event-stream` decoder

use tracing::warn;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Longest line kept while waiting for its newline. A whole-subtree snapshot
/// arrives as one `data:` line, so this is generous.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Feeds arbitrary byte chunks, yields complete events. Lines split across
/// chunks are buffered until their newline arrives; a line longer than the
/// limit is dropped along with the event it belongs to.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// `buf[..scanned]` holds no newline
    scanned: usize,
    max_line: usize,
    /// Skipping the tail of an oversized line
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
            event: None,
            data: Vec::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        let chunk = if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return events,
            }
        } else {
            chunk
        };
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
            start = end + 1;
            self.scanned = start;
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            warn!(bytes = self.buf.len(), "Dropping oversized server-sent event line");
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
            self.event = None;
            self.data.clear();
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
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
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_firebase_put() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: put\ndata: {\"path\":\"/dev-1\",\"data\":true}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "put".to_string(),
                data: "{\"path\":\"/dev-1\",\"data\":true}".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: pat").is_empty());
        assert!(decoder.feed(b"ch\r\ndata: {\"a\"").is_empty());
        let events = decoder.feed(b":1}\r\n\r\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "patch");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event, "keep-alive");
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b": hello\n\n\n").is_empty());
    }

    #[test]
    fn test_long_line_scanned_incrementally() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: put\ndata: ").is_empty());
        for _ in 0..100 {
            assert!(decoder.feed(b"0123456789").is_empty());
        }
        let events = decoder.feed(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.len(), 1000);
    }

    #[test]
    fn test_oversized_line_dropped_with_its_event() {
        let mut decoder = SseDecoder::with_max_line(16);
        assert!(decoder.feed(b"event: put\ndata: 0123456789abcdef").is_empty());
        // tail of the dropped line, then a clean event
        let events = decoder.feed(b"ghij\n\nevent: patch\ndata: {}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "patch".to_string(),
                data: "{}".to_string(),
            }]
        );
    }
}
