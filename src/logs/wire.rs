use crate::logs::classify::parse_json_event;
use crate::logs::event::LogEvent;

/// Incremental decoder for a streamed NDJSON body.
///
/// Chunks may split a line (or a multi-byte character) anywhere; bytes are
/// buffered until a newline arrives. Lines that are not valid events are
/// surfaced as `info` with the raw text, blank lines are skipped.
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<LogEvent> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }
}

fn decode_line(bytes: &[u8]) -> Option<LogEvent> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return None;
    }
    Some(parse_json_event(line).unwrap_or_else(|| LogEvent::info(line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogKind;

    #[test]
    fn decodes_multiple_events_in_one_chunk() {
        let mut decoder = EventDecoder::new();
        let chunk = concat!(
            r#"{"type":"info","message":"starting"}"#,
            "\n",
            r#"{"type":"success","message":"done"}"#,
            "\n"
        );

        let events = decoder.push(chunk.as_bytes());
        assert_eq!(
            events,
            vec![LogEvent::info("starting"), LogEvent::success("done")]
        );
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut decoder = EventDecoder::new();
        let line = "{\"type\":\"warning\",\"message\":\"경고 메시지\"}\n".as_bytes();
        // Split inside a multi-byte character.
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;

        assert!(decoder.push(&line[..split]).is_empty());
        let events = decoder.push(&line[split..]);
        assert_eq!(events, vec![LogEvent::warning("경고 메시지")]);
    }

    #[test]
    fn non_json_lines_become_info_and_blanks_are_skipped() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"plain text\r\n\n   \n");
        assert_eq!(events, vec![LogEvent::info("plain text")]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(br#"{"type":"error","message":"tail"}"#).is_empty());

        let event = decoder.finish().unwrap();
        assert_eq!(event.kind, LogKind::Error);
        assert_eq!(event.message, "tail");
    }
}
