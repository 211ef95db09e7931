//! Headless scrollback retention and replay
//!
//! Every session owns a `ReplayBuffer`: a `vt100` emulator that tracks the
//! rendered screen plus a bounded raw-byte history of everything the
//! process ever wrote. Serialization prefers the raw history (the UI's
//! terminal widget replays it losslessly); once the cap has evicted bytes
//! from the front, a replay could begin mid-escape-sequence, so the
//! serializer falls back to the emulator's formatted screen contents.

use std::collections::VecDeque;

/// In-memory terminal emulator with full-history replay.
pub struct ReplayBuffer {
    parser: vt100::Parser,
    raw: VecDeque<u8>,
    max_raw_bytes: usize,
    total_seen: u64,
    truncated: bool,
}

impl ReplayBuffer {
    pub fn new(rows: u16, cols: u16, scrollback_lines: usize, max_raw_bytes: usize) -> Self {
        Self {
            parser: vt100::Parser::new(rows, cols, scrollback_lines),
            raw: VecDeque::with_capacity(max_raw_bytes.min(64 * 1024)),
            max_raw_bytes,
            total_seen: 0,
            truncated: false,
        }
    }

    /// Feed output into the emulator and the raw history.
    pub fn process(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.parser.process(data);
        self.total_seen += data.len() as u64;

        self.raw.extend(data.iter().copied());
        while self.raw.len() > self.max_raw_bytes {
            self.raw.pop_front();
            self.truncated = true;
        }
    }

    /// Resize the emulator screen. The raw history is unaffected.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.set_size(rows, cols);
    }

    /// Reproduce all retained output as a single block of display data.
    ///
    /// Empty until the session has produced output.
    pub fn serialize(&self) -> String {
        if self.total_seen == 0 {
            return String::new();
        }
        if !self.truncated {
            let bytes: Vec<u8> = self.raw.iter().copied().collect();
            return String::from_utf8_lossy(&bytes).into_owned();
        }
        String::from_utf8_lossy(&self.parser.screen().contents_formatted()).into_owned()
    }

    /// Plain-text view of the current screen.
    pub fn contents(&self) -> String {
        self.parser.screen().contents()
    }

    pub fn is_empty(&self) -> bool {
        self.total_seen == 0
    }

    /// Current emulator geometry as (rows, cols).
    pub fn size(&self) -> (u16, u16) {
        self.parser.screen().size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> ReplayBuffer {
        ReplayBuffer::new(24, 80, 1000, 1024 * 1024)
    }

    #[test]
    fn empty_buffer_serializes_to_empty_string() {
        let buf = buffer();
        assert!(buf.is_empty());
        assert_eq!(buf.serialize(), "");
    }

    #[test]
    fn retains_chunks_in_order() {
        let mut buf = buffer();
        buf.process(b"A");
        buf.process(b"B");
        buf.process(b"C");
        assert_eq!(buf.serialize(), "ABC");
        assert_eq!(buf.contents(), "ABC");
    }

    #[test]
    fn raw_replay_preserves_escape_sequences() {
        let mut buf = buffer();
        buf.process(b"\x1b[31mred\x1b[0m plain");
        assert_eq!(buf.serialize(), "\x1b[31mred\x1b[0m plain");
        assert_eq!(buf.contents(), "red plain");
    }

    #[test]
    fn overflow_falls_back_to_rendered_screen() {
        let mut buf = ReplayBuffer::new(24, 80, 1000, 64);
        buf.process(b"first-line-marker\r\n");
        for _ in 0..30 {
            buf.process(b"0123456789\r\n");
        }
        buf.process(b"tail");
        let snapshot = buf.serialize();
        // A torn raw stream is never replayed; the emulator's rendered
        // screen still carries the recent content, while the evicted
        // first line is gone.
        assert!(snapshot.contains("tail"));
        assert!(!snapshot.contains("first-line-marker"));
    }

    #[test]
    fn resize_updates_emulator_geometry() {
        let mut buf = buffer();
        buf.resize(120, 40);
        assert_eq!(buf.size(), (40, 120));
    }
}
