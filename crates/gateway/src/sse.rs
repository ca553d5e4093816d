//! Incremental server-sent-events codec.
//!
//! The parser accepts byte chunks of arbitrary framing and yields complete
//! events as they are terminated by a blank line. It retains at most one
//! partial line and one pending event between calls, and is restartable
//! after [`SseParser::finish`].

/// One parsed `event:`/`data:` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, empty when the frame carried no `event:` line.
    pub event: String,
    /// Data payload. Multiple `data:` lines are joined with `\n`.
    pub data: String,
}

/// Incremental SSE parser: `push(chunk) -> [events]`, `finish() -> [events]`.
#[derive(Debug, Default)]
pub struct SseParser {
    partial: Vec<u8>,
    event: String,
    data: Option<String>,
    saw_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any `data:` line has been observed since construction. Used to
    /// decide whether an upstream body was SSE at all.
    pub fn saw_data(&self) -> bool {
        self.saw_data
    }

    /// Feed a chunk of bytes, returning the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for byte in chunk {
            if *byte == b'\n' {
                let line = std::mem::take(&mut self.partial);
                if let Some(event) = self.take_line(&line) {
                    events.push(event);
                }
            } else {
                self.partial.push(*byte);
            }
        }

        events
    }

    /// Flush the trailing partial line and any pending event, resetting the
    /// parser so it can be reused on a fresh stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();

        let line = std::mem::take(&mut self.partial);
        if !line.is_empty()
            && let Some(event) = self.take_line(&line)
        {
            events.push(event);
        }

        if let Some(event) = self.dispatch() {
            events.push(event);
        }

        self.event.clear();
        self.data = None;

        events
    }

    fn take_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        if raw.is_empty() {
            return self.dispatch();
        }

        let line = String::from_utf8_lossy(raw);

        if let Some(value) = line.strip_prefix("event:") {
            self.event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.saw_data = true;

            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        } else if line.starts_with(':') {
            // comment, ignored
        }
        // any other prefix is dropped

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let data = self.data.take()?;
        let event = std::mem::take(&mut self.event);

        Some(SseEvent { event, data })
    }
}

/// Encode one frame: `event: <e>\ndata: <d>\n\n`, or `data: <d>\n\n` when the
/// event name is empty.
pub fn encode(event: &str, data: &str) -> String {
    if event.is_empty() {
        format!("data: {data}\n\n")
    } else {
        format!("event: {event}\ndata: {data}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::{SseEvent, SseParser, encode};

    fn parse_all(parser: &mut SseParser, input: &[u8]) -> Vec<SseEvent> {
        let mut events = parser.push(input);
        events.extend(parser.finish());
        events
    }

    #[test]
    fn parses_named_events() {
        let mut parser = SseParser::new();
        let events = parse_all(
            &mut parser,
            b"event: response.created\ndata: {\"id\":\"r_1\"}\n\nevent: done\ndata: [DONE]\n\n",
        );

        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "response.created".into(),
                    data: r#"{"id":"r_1"}"#.into()
                },
                SseEvent {
                    event: "done".into(),
                    data: "[DONE]".into()
                },
            ]
        );
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut parser = SseParser::new();
        let events = parse_all(&mut parser, b"data: one\ndata: two\n\n");

        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn strips_one_leading_space_only() {
        let mut parser = SseParser::new();
        let events = parse_all(&mut parser, b"data:  padded\n\n");

        assert_eq!(events[0].data, " padded");
    }

    #[test]
    fn ignores_comments_and_unknown_fields() {
        let mut parser = SseParser::new();
        let events = parse_all(&mut parser, b": keep-alive\nretry: 500\ndata: x\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parse_all(&mut parser, b"event: e\r\ndata: d\r\n\r\n");

        assert_eq!(events[0].event, "e");
        assert_eq!(events[0].data, "d");
    }

    #[test]
    fn chunking_is_invisible() {
        let input = b"event: response.output_text.delta\ndata: {\"delta\":\"He\"}\n\ndata: {\"delta\":\"llo\"}\n\n";

        let mut whole = SseParser::new();
        let expected = parse_all(&mut whole, input);

        for chunk_size in [1, 2, 3, 5, 7, 11, input.len()] {
            let mut parser = SseParser::new();
            let mut events = Vec::new();

            for chunk in input.chunks(chunk_size) {
                events.extend(parser.push(chunk));
            }
            events.extend(parser.finish());

            assert_eq!(events, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn survives_utf8_split_across_chunks() {
        let payload = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte é sequence.
        let split = payload.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut parser = SseParser::new();
        let mut events = parser.push(&payload[..split]);
        events.extend(parser.push(&payload[split..]));
        events.extend(parser.finish());

        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: tail").is_empty());

        let events = parser.finish();
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn restartable_after_finish() {
        let mut parser = SseParser::new();
        parser.push(b"data: first");
        parser.finish();

        let events = parse_all(&mut parser, b"data: second\n\n");
        assert_eq!(events[0].data, "second");
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        let mut parser = SseParser::new();
        let events = parse_all(&mut parser, b"event: ping\n\n");
        assert!(events.is_empty());
        assert!(!parser.saw_data());
    }

    #[test]
    fn encodes_frames() {
        assert_eq!(encode("ping", "{}"), "event: ping\ndata: {}\n\n");
        assert_eq!(encode("", "[DONE]"), "data: [DONE]\n\n");
    }
}
