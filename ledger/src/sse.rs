//! Incremental decoder for server-sent event streams.
//!
//! Chunks read from the transport are pushed into a [Decoder], which yields the `data` of every
//! complete event. An event ends at the first blank line; multiple `data` lines are joined with
//! `\n`. Comments (lines starting with `:`) and the `event`, `id`, and `retry` fields carry no
//! payload and are skipped. Events without any `data` line are dropped.

use bytes::Bytes;

/// Maximum number of bytes buffered for a single incomplete event.
const MAX_PENDING: usize = 1024 * 1024;

/// Splits a byte stream into event payloads.
#[derive(Default)]
pub struct Decoder {
    pending: Vec<u8>,
    data: Option<Vec<u8>>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the payloads of all events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.line(&line) {
                events.push(event);
            }
        }

        // A peer that never terminates a line should not exhaust memory
        if self.pending.len() > MAX_PENDING {
            self.pending.clear();
            self.data = None;
        }
        events
    }

    fn line(&mut self, line: &[u8]) -> Option<Bytes> {
        if line.is_empty() {
            return self.data.take().map(Bytes::from);
        }
        if line[0] == b':' {
            return None;
        }
        let (field, value) = match line.iter().position(|b| *b == b':') {
            Some(split) => {
                let value = &line[split + 1..];
                (&line[..split], value.strip_prefix(&b" "[..]).unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        if field == b"data" {
            let data = self.data.get_or_insert_with(Vec::new);
            if !data.is_empty() {
                data.push(b'\n');
            }
            data.extend_from_slice(value);
        }
        None
    }
}
