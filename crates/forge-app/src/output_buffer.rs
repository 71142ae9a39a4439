//! Diagnostic accumulation of process output
//!
//! The status line only ever shows the latest output. When a process fails,
//! the error report needs more than that, so every chunk also lands in a
//! bounded buffer of recent lines.

use std::collections::VecDeque;

use forge_core::{
    after_line_reset, contains_ansi_codes, strip_ansi_codes, strip_control_sequences,
    ServerStatus,
};

/// Longest line kept, in bytes; longer lines keep their end.
pub const MAX_LINE_BYTES: usize = 4096;

/// Bounded buffer of recent output lines, escape codes removed.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    /// Text after the last newline; continued by the next chunk
    partial: String,
    /// The last chunk ended in `\r`; a reset unless the next starts with `\n`
    pending_cr: bool,
    capacity: usize,
    chunks: usize,
}

impl OutputBuffer {
    /// Buffer keeping at most `capacity` lines (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            partial: String::new(),
            pending_cr: false,
            capacity: capacity.max(1),
            chunks: 0,
        }
    }

    /// Add one raw output chunk.
    ///
    /// A carriage return, cursor-column move or line erase overwrites the
    /// current line, even when it arrives in a later chunk than the text it
    /// replaces.
    pub fn push(&mut self, chunk: &str) {
        self.chunks += 1;

        let mut text = chunk;
        if std::mem::take(&mut self.pending_cr) && !text.starts_with('\n') {
            self.partial.clear();
        }
        if let Some(stripped) = text.strip_suffix('\r') {
            self.pending_cr = true;
            text = stripped;
        }

        let mut pieces = text.split('\n').peekable();
        while let Some(piece) = pieces.next() {
            let piece = piece.trim_end_matches('\r');
            let visible = match after_line_reset(piece) {
                Some(rest) => {
                    self.partial.clear();
                    rest
                }
                None => piece,
            };
            self.partial.push_str(&strip_ansi_codes(visible));
            keep_tail(&mut self.partial);

            if pieces.peek().is_some() {
                let line = std::mem::take(&mut self.partial);
                self.push_line(line);
            }
        }
    }

    fn push_line(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Recent output, oldest first, with surrounding blank lines trimmed.
    pub fn tail(&self) -> String {
        let mut all: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        if !self.partial.is_empty() {
            all.push(&self.partial);
        }
        all.join("\n").trim().to_string()
    }

    /// Last non-blank line
    pub fn last_line(&self) -> Option<&str> {
        std::iter::once(self.partial.as_str())
            .chain(self.lines.iter().rev().map(String::as_str))
            .map(str::trim)
            .find(|line| !line.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.partial.is_empty()
    }

    /// Chunks pushed since creation or the last clear
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.partial.clear();
        self.pending_cr = false;
        self.chunks = 0;
    }
}

/// Trim `line` from the front to at most [`MAX_LINE_BYTES`].
fn keep_tail(line: &mut String) {
    if line.len() <= MAX_LINE_BYTES {
        return;
    }
    let mut cut = line.len() - MAX_LINE_BYTES;
    while !line.is_char_boundary(cut) {
        cut += 1;
    }
    line.drain(..cut);
}

/// Status projection for one output chunk.
///
/// Shows the chunk's last non-blank line. Colour is kept (as rich text) when
/// the line has any; other escape codes are always dropped. `None` when the
/// chunk has nothing visible, so the previous status stays.
pub fn status_for_chunk(chunk: &str) -> Option<ServerStatus> {
    let cleaned = strip_control_sequences(chunk);
    let line = cleaned
        .lines()
        .rev()
        .find(|line| !strip_ansi_codes(line).trim().is_empty())?;

    if contains_ansi_codes(line) {
        Some(ServerStatus::rich(line.trim()))
    } else {
        Some(ServerStatus::plain(line.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_chunks() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push("npm WARN dep");
        buffer.push("recated foo\nadded 3 packages\n");

        assert_eq!(buffer.tail(), "npm WARN deprecated foo\nadded 3 packages");
        assert_eq!(buffer.last_line(), Some("added 3 packages"));
        assert_eq!(buffer.chunk_count(), 2);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut buffer = OutputBuffer::new(2);
        buffer.push("one\ntwo\nthree\n");
        assert_eq!(buffer.tail(), "two\nthree");
    }

    #[test]
    fn test_tail_equals_single_chunk_without_escapes() {
        let mut buffer = OutputBuffer::new(50);
        let chunk = "\x1b[31mError: Cannot find module 'vite'\x1b[39m\n    at Module._resolve\n";
        buffer.push(chunk);
        assert_eq!(buffer.tail(), strip_ansi_codes(chunk).trim());
    }

    #[test]
    fn test_partial_line_is_visible() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push("Ok to proceed? (y) ");
        assert_eq!(buffer.tail(), "Ok to proceed? (y)");
        assert_eq!(buffer.last_line(), Some("Ok to proceed? (y)"));
    }

    #[test]
    fn test_spinner_frames_overwrite_each_other() {
        let mut buffer = OutputBuffer::new(50);
        for frame in ["⠋", "⠙", "⠹", "⠸"].iter().cycle().take(2000) {
            buffer.push(&format!("\x1b[1G\x1b[0K{} idealTree: timing", frame));
        }
        buffer.push("\nnpm ERR! code ERESOLVE\n");

        assert_eq!(buffer.tail(), "⠸ idealTree: timing\nnpm ERR! code ERESOLVE");
    }

    #[test]
    fn test_carriage_return_split_across_chunks() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push("downloading 10%\r");
        buffer.push("downloading 100%\r");
        buffer.push("\ndone\n");
        assert_eq!(buffer.tail(), "downloading 100%\ndone");

        let mut buffer = OutputBuffer::new(10);
        buffer.push("line one\r");
        buffer.push("\nline two\r\n");
        assert_eq!(buffer.tail(), "line one\nline two");
    }

    #[test]
    fn test_line_without_newline_is_capped() {
        let mut buffer = OutputBuffer::new(10);
        for _ in 0..1000 {
            buffer.push("é.........");
        }
        buffer.push("end");

        let tail = buffer.tail();
        assert!(tail.len() <= MAX_LINE_BYTES);
        assert!(tail.ends_with("é.........end"));
    }

    #[test]
    fn test_clear() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push("x\n");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.tail(), "");
        assert_eq!(buffer.last_line(), None);
    }

    #[test]
    fn test_status_for_plain_chunk() {
        let status = status_for_chunk("added 214 packages\n\n").unwrap();
        assert_eq!(status, ServerStatus::plain("added 214 packages"));
    }

    #[test]
    fn test_status_keeps_color_drops_cursor_codes() {
        let status = status_for_chunk("\x1b[?25l\x1b[32mVITE\x1b[39m ready\x1b[?25h\n").unwrap();
        assert!(status.is_rich_text);
        assert_eq!(status.message, "\x1b[32mVITE\x1b[39m ready");
    }

    #[test]
    fn test_status_none_for_invisible_chunk() {
        assert!(status_for_chunk("\x1b[2K\x1b[1G").is_none());
        assert!(status_for_chunk("\n  \n").is_none());
    }
}
