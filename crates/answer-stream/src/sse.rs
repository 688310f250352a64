use tracing::warn;

use crate::buffer::{BufferManager, TRUNCATION_MARKER};
use crate::chunk::StreamingChunk;

const DATA_PREFIX: &str = "data: ";

/// Incremental decoder from raw SSE bytes to [`StreamingChunk`]s.
///
/// Multi-byte UTF-8 sequences and unterminated lines are carried across
/// `push` calls, so the split of the byte stream into reads never changes
/// the decoded chunks.
///
/// An event line that grows past the buffer's hard limit cannot be parsed
/// any more. It is dropped up to its terminating newline and replaced by a
/// `chunk` carrying [`TRUNCATION_MARKER`], so the loss shows up in the
/// accumulated answer.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    utf8_carry: Vec<u8>,
    pending: String,
    buffer: BufferManager,
    /// Byte length of `pending` at which the overflow check runs again.
    next_overflow_check: usize,
    /// Skipping the rest of a line that was replaced by the marker.
    discarding: bool,
}

impl SseLineDecoder {
    /// Creates a decoder whose pending-line buffer is bounded by `buffer`.
    pub fn with_buffer_manager(buffer: BufferManager) -> Self {
        Self {
            buffer,
            ..Self::default()
        }
    }

    /// Feeds one network read and returns every chunk completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamingChunk> {
        self.decode_utf8(bytes);
        let mut chunks = Vec::new();

        if self.discarding {
            match self.pending.find('\n') {
                Some(idx) => {
                    self.pending.replace_range(..=idx, "");
                    self.discarding = false;
                }
                None => {
                    self.pending.clear();
                    return chunks;
                }
            }
        }

        if self.overflow_check_due() {
            self.next_overflow_check = self.pending.len() + self.overflow_check_step();
            if self
                .buffer
                .should_handle_overflow(self.pending.chars().count())
            {
                self.handle_overflow(&mut chunks);
                return chunks;
            }
        }

        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            if let Ok(Some(chunk)) = parse_line(&line) {
                chunks.push(chunk);
            }
        }
        if self.pending.len() <= self.buffer.max_buffer_size() {
            self.next_overflow_check = 0;
        }
        chunks
    }

    /// Flushes a final unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<StreamingChunk> {
        if !self.utf8_carry.is_empty() {
            let carry = std::mem::take(&mut self.utf8_carry);
            self.pending.push_str(&String::from_utf8_lossy(&carry));
        }
        let line = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        match parse_line(&line) {
            Ok(Some(chunk)) => vec![chunk],
            _ => Vec::new(),
        }
    }

    pub fn buffer_manager(&self) -> &BufferManager {
        &self.buffer
    }

    /// Character counting is linear, so it only runs once `pending` is past
    /// the threshold in bytes and has grown by a step since the last check.
    fn overflow_check_due(&self) -> bool {
        let len = self.pending.len();
        len > self.buffer.max_buffer_size() && len >= self.next_overflow_check
    }

    fn overflow_check_step(&self) -> usize {
        (self.buffer.max_buffer_size() / 4).max(1)
    }

    fn handle_overflow(&mut self, chunks: &mut Vec<StreamingChunk>) {
        let truncations = self.buffer.stats().truncation_count;
        let pending = std::mem::take(&mut self.pending);
        let remainder = self.buffer.handle_buffer_overflow(&pending, |line| {
            parse_line(line).map(|chunk| chunks.extend(chunk))
        });
        if self.buffer.stats().truncation_count == truncations {
            self.next_overflow_check = remainder.len() + self.overflow_check_step();
            self.pending = remainder;
            return;
        }

        // Truncation only happens to a line with no newline yet.
        warn!(
            dropped_bytes = pending.len(),
            "SSE line exceeded the buffer hard limit; dropping it"
        );
        self.discarding = true;
        self.next_overflow_check = 0;
        if pending.starts_with(DATA_PREFIX) {
            chunks.push(StreamingChunk::text(TRUNCATION_MARKER));
        }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        let mut input = std::mem::take(&mut self.utf8_carry);
        input.extend_from_slice(bytes);
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.pending.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.pending
                        .push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end of this read.
                        None => {
                            self.utf8_carry = rest[valid..].to_vec();
                            return;
                        }
                        Some(len) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                    }
                }
            }
        }
    }
}

/// Parses one SSE line. `Ok(None)` means the line carries no chunk.
fn parse_line(line: &str) -> Result<Option<StreamingChunk>, serde_json::Error> {
    let line = line.trim_end_matches(['\n', '\r']);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<StreamingChunk>(payload)
        .map(Some)
        .inspect_err(|err| warn!(error = %err, payload_len = payload.len(), "skipping malformed SSE event"))
}
