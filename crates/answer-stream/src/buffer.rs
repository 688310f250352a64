//! Overflow protection for long-lived text accumulation buffers.
//!
//! The manager never owns the buffer. Callers pass the oversized text in and
//! keep whatever remainder comes back.

use std::fmt;

use tracing::warn;

/// Default character threshold before a buffer counts as overflowing.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 500_000;

/// Marker inserted where the middle of an unterminated buffer was dropped.
pub const TRUNCATION_MARKER: &str = "[... content truncated for memory management ...]";

/// Diagnostic counters; nothing depends on them for correctness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub overflow_count: u64,
    /// Times the head/tail fallback dropped the middle of a buffer.
    pub truncation_count: u64,
}

/// Bounds a caller-owned text buffer.
#[derive(Debug)]
pub struct BufferManager {
    max_buffer_size: usize,
    overflow_count: u64,
    truncation_count: u64,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl BufferManager {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size: max_buffer_size.max(1),
            overflow_count: 0,
            truncation_count: 0,
        }
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Size above which an unterminated buffer is truncated.
    pub fn hard_limit(&self) -> usize {
        self.max_buffer_size.saturating_mul(2)
    }

    /// Returns true when `size` (in characters) exceeds the threshold.
    pub fn should_handle_overflow(&self, size: usize) -> bool {
        size > self.max_buffer_size
    }

    /// Processes complete lines out of an oversized buffer and returns the
    /// unprocessed remainder.
    ///
    /// Every non-blank line before the last newline is handed to
    /// `process_line` in order; a failing line is logged and skipped. When
    /// the buffer has no newline at all it is returned unchanged unless it is
    /// larger than [`hard_limit`](Self::hard_limit), in which case only the
    /// head and tail of a threshold-sized window survive around
    /// [`TRUNCATION_MARKER`].
    pub fn handle_buffer_overflow<F, E>(&mut self, buffer: &str, mut process_line: F) -> String
    where
        F: FnMut(&str) -> Result<(), E>,
        E: fmt::Display,
    {
        self.overflow_count += 1;

        if let Some(last_newline) = buffer.rfind('\n') {
            let complete = &buffer[..last_newline];
            let remainder = &buffer[last_newline + 1..];
            let mut processed = 0_usize;
            for line in complete.split('\n') {
                let line = line.trim_end_matches('\r');
                if line.trim().is_empty() {
                    continue;
                }
                match process_line(line) {
                    Ok(()) => processed += 1,
                    Err(err) => warn!(error = %err, "failed to process buffered line; skipping"),
                }
            }
            warn!(
                processed,
                remainder_len = remainder.len(),
                overflow_count = self.overflow_count,
                "buffer overflow: flushed complete lines"
            );
            return remainder.to_string();
        }

        let size = buffer.chars().count();
        if size <= self.hard_limit() {
            warn!(
                size,
                overflow_count = self.overflow_count,
                "buffer overflow without line boundary; keeping content"
            );
            return buffer.to_string();
        }

        self.truncation_count += 1;
        let keep = self.max_buffer_size * 2 / 5;
        let head_end = byte_offset_of_char(buffer, keep);
        let tail_start = byte_offset_of_char(buffer, size - keep);
        warn!(
            size,
            kept_chars = keep * 2,
            overflow_count = self.overflow_count,
            "buffer exceeded hard limit without line boundary; truncating middle"
        );
        format!(
            "{}\n\n{}\n\n{}",
            &buffer[..head_end],
            TRUNCATION_MARKER,
            &buffer[tail_start..]
        )
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            overflow_count: self.overflow_count,
            truncation_count: self.truncation_count,
        }
    }

    /// Zeroes the counters. Caller buffers are untouched.
    pub fn reset(&mut self) {
        self.overflow_count = 0;
        self.truncation_count = 0;
    }
}

fn byte_offset_of_char(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(offset, _)| offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_is_strictly_greater_than_threshold() {
        let manager = BufferManager::new(10);
        assert!(!manager.should_handle_overflow(10));
        assert!(manager.should_handle_overflow(11));
        assert_eq!(BufferManager::default().max_buffer_size(), 500_000);
        assert_eq!(BufferManager::default().hard_limit(), 1_000_000);
    }

    #[test]
    fn processes_complete_lines_in_order_and_returns_partial_remainder() {
        let mut manager = BufferManager::new(16);
        let buffer = "line one\nline two\n\nline three\npartial tail";
        let mut seen = Vec::new();
        let rest = manager.handle_buffer_overflow(buffer, |line| {
            seen.push(line.to_string());
            Ok::<(), String>(())
        });
        assert_eq!(seen, vec!["line one", "line two", "line three"]);
        assert_eq!(rest, "partial tail");
        assert_eq!(manager.stats().overflow_count, 1);
    }

    #[test]
    fn failing_line_does_not_abort_the_batch() {
        let mut manager = BufferManager::new(4);
        let mut seen = Vec::new();
        let rest = manager.handle_buffer_overflow("a\nbad\nc\n", |line| {
            if line == "bad" {
                return Err("boom");
            }
            seen.push(line.to_string());
            Ok(())
        });
        assert_eq!(seen, vec!["a", "c"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn moderately_oversized_single_line_is_kept_intact() {
        let mut manager = BufferManager::new(10);
        let buffer = "x".repeat(15);
        let rest = manager.handle_buffer_overflow(&buffer, |_| Ok::<(), String>(()));
        assert_eq!(rest, buffer);
        assert_eq!(manager.stats().truncation_count, 0);
    }

    #[test]
    fn huge_single_line_keeps_head_and_tail_around_marker() {
        let mut manager = BufferManager::new(10);
        let buffer = format!("{}{}{}", "H".repeat(5), "m".repeat(20), "T".repeat(5));
        let rest = manager.handle_buffer_overflow(&buffer, |_| Ok::<(), String>(()));
        assert_eq!(rest, format!("HHHH\n\n{TRUNCATION_MARKER}\n\nTTTT"));
        assert_eq!(manager.stats().truncation_count, 1);
    }

    #[test]
    fn truncation_respects_multibyte_characters() {
        let mut manager = BufferManager::new(5);
        let buffer = "é".repeat(12);
        let rest = manager.handle_buffer_overflow(&buffer, |_| Ok::<(), String>(()));
        assert!(rest.starts_with("éé\n\n"));
        assert!(rest.ends_with("\n\néé"));
    }

    #[test]
    fn reset_only_zeroes_counter() {
        let mut manager = BufferManager::new(1);
        let buffer = "ab\ncd".to_string();
        let _ = manager.handle_buffer_overflow(&buffer, |_| Ok::<(), String>(()));
        manager.reset();
        assert_eq!(manager.stats(), BufferStats::default());
        assert_eq!(buffer, "ab\ncd");
    }
}
