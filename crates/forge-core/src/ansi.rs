//! ANSI escape code handling utilities
//!
//! Dev tools (npm, vite) decorate their output with colours, spinners, cursor
//! movement and terminal-title updates. Outside a real terminal those bytes
//! show up as garbage, so every chunk goes through one of two filters:
//!
//! - [`strip_ansi_codes`] removes everything; used before pattern matching.
//! - [`strip_control_sequences`] removes everything *except* SGR colour codes;
//!   used before converting to HTML (see [`crate::ansi_html`]).

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Regex pattern for ANSI escape sequences.
///
/// Covers:
/// - CSI sequences: ESC [ params intermediates final (colours, cursor, clear, ?25l/h)
/// - OSC sequences: ESC ] ... BEL or ST (titles, hyperlinks)
/// - Charset selection: ESC ( B and friends
/// - Two-byte escapes: ESC 7, ESC 8, ESC =, ESC >, ESC M, ...
/// - A lone ESC left over from a sequence split across chunks
static ANSI_ESCAPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \x1b\[[0-?]*[\x20-/]*[@-~]           # CSI sequences
        | \x1b\][^\x07\x1b]*(?:\x07|\x1b\\)  # OSC sequences
        | \x1b[()*+][0-9A-Za-z]              # Charset selection
        | \x1b[0-9=>@-Z\\^_a-z]              # Two-byte escapes
        | \x1b                               # Dangling ESC
        ",
    )
    .expect("ANSI regex pattern is valid")
});

/// SGR (Select Graphic Rendition) sequences: the only ones that carry colour.
static SGR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\x1b\[[0-9;]*m$").expect("SGR regex pattern is valid"));

/// Stray C0 control bytes that render as boxes (BEL, backspace, vertical tab, ...).
static STRAY_CONTROL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1a\x1c-\x1f\x7f]").expect("control regex pattern is valid")
});

/// Sequences that send the cursor back to the start of the current line.
static LINE_RESET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r|\x1b\[[0-9]*G|\x1b\[2K").expect("line reset regex pattern is valid")
});

/// Strip all ANSI escape sequences from a string.
///
/// Also collapses carriage-return overwrites, so a spinner that redraws one
/// line with `\r` keeps only the final frame.
///
/// # Examples
///
/// ```
/// use forge_core::strip_ansi_codes;
///
/// let input = "\x1b[?25l\x1b[32mready\x1b[39m\x1b[?25h";
/// assert_eq!(strip_ansi_codes(input), "ready");
/// ```
pub fn strip_ansi_codes(input: &str) -> String {
    let without_ansi = ANSI_ESCAPE_PATTERN.replace_all(input, "");
    let without_controls = STRAY_CONTROL_PATTERN.replace_all(&without_ansi, "");
    collapse_carriage_returns(&without_controls).into_owned()
}

/// Strip every escape sequence that is not an SGR colour code.
///
/// Cursor show/hide, cursor movement, screen clears, title updates and any
/// unrecognised sequence are removed; colour codes survive for HTML conversion.
///
/// # Examples
///
/// ```
/// use forge_core::strip_control_sequences;
///
/// let input = "\x1b[2K\x1b[1G\x1b[31merror\x1b[0m";
/// assert_eq!(strip_control_sequences(input), "\x1b[31merror\x1b[0m");
/// ```
pub fn strip_control_sequences(input: &str) -> String {
    let filtered = ANSI_ESCAPE_PATTERN.replace_all(input, |caps: &regex::Captures<'_>| {
        let seq = &caps[0];
        if SGR_PATTERN.is_match(seq) {
            seq.to_string()
        } else {
            String::new()
        }
    });
    let without_controls = STRAY_CONTROL_PATTERN.replace_all(&filtered, "");
    collapse_carriage_returns(&without_controls).into_owned()
}

/// Text after the last line reset in `line`, if it has one.
///
/// A line reset is a carriage return, a cursor-column move (`ESC[<n>G`) or a
/// whole-line erase (`ESC[2K`): whatever came before it on the line has been
/// overwritten. `line` must not contain `\n`.
///
/// # Examples
///
/// ```
/// use forge_core::after_line_reset;
///
/// assert_eq!(after_line_reset("\x1b[1G\x1b[0K⠙ idealTree"), Some("\x1b[0K⠙ idealTree"));
/// assert_eq!(after_line_reset("50%\r100%"), Some("100%"));
/// assert_eq!(after_line_reset("plain"), None);
/// ```
pub fn after_line_reset(line: &str) -> Option<&str> {
    LINE_RESET_PATTERN
        .find_iter(line)
        .last()
        .map(|reset| &line[reset.end()..])
}

/// Check if a string contains ANSI escape sequences.
///
/// # Examples
///
/// ```
/// use forge_core::contains_ansi_codes;
///
/// assert!(contains_ansi_codes("\x1b[31mred\x1b[0m"));
/// assert!(!contains_ansi_codes("plain text"));
/// ```
pub fn contains_ansi_codes(input: &str) -> bool {
    ANSI_ESCAPE_PATTERN.is_match(input)
}

/// Keep only the text after the last `\r` on each line.
///
/// A trailing `\r` (CRLF line endings) is not an overwrite and is dropped.
fn collapse_carriage_returns(input: &str) -> Cow<'_, str> {
    if !input.contains('\r') {
        return Cow::Borrowed(input);
    }

    let collapsed: Vec<&str> = input
        .split('\n')
        .map(|line| {
            let line = line.trim_end_matches('\r');
            match line.rfind('\r') {
                Some(idx) => &line[idx + 1..],
                None => line,
            }
        })
        .collect();

    Cow::Owned(collapsed.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_simple_color_codes() {
        let input = "\x1b[31mred text\x1b[0m";
        assert_eq!(strip_ansi_codes(input), "red text");
    }

    #[test]
    fn test_strip_256_and_rgb_color_codes() {
        assert_eq!(strip_ansi_codes("\x1b[38;5;244mdim\x1b[0m"), "dim");
        assert_eq!(
            strip_ansi_codes("\x1b[38;2;255;100;50mRGB color\x1b[0m"),
            "RGB color"
        );
    }

    #[test]
    fn test_cursor_hide_color_cursor_show_leaves_no_escape_bytes() {
        let input = "before \x1b[?25l\x1b[1m\x1b[36mVITE\x1b[39m\x1b[22m v5.0.0\x1b[?25h after";
        let stripped = strip_ansi_codes(input);

        assert!(!stripped.contains('\x1b'));
        assert_eq!(stripped, "before VITE v5.0.0 after");
    }

    #[test]
    fn test_strip_cursor_movement_and_clear() {
        let input = "\x1b[2J\x1b[H\x1b[3A\x1b[10Cline\x1b[K";
        assert_eq!(strip_ansi_codes(input), "line");
    }

    #[test]
    fn test_strip_title_sequences() {
        let input = "\x1b]0;npm install\x07added 12 packages";
        assert_eq!(strip_ansi_codes(input), "added 12 packages");

        let input = "\x1b]2;vite\x1b\\ready";
        assert_eq!(strip_ansi_codes(input), "ready");
    }

    #[test]
    fn test_strip_charset_and_two_byte_escapes() {
        let input = "\x1b(B\x1b7saved\x1b8\x1b=";
        assert_eq!(strip_ansi_codes(input), "saved");
    }

    #[test]
    fn test_dangling_escape_removed() {
        assert_eq!(strip_ansi_codes("partial \x1b"), "partial ");
    }

    #[test]
    fn test_carriage_return_keeps_last_frame() {
        let input = "⠋ installing\r⠙ installing\r⠹ done\nnext line\r\n";
        assert_eq!(strip_ansi_codes(input), "⠹ done\nnext line\n");
    }

    #[test]
    fn test_strip_control_sequences_keeps_sgr() {
        let input = "\x1b[?25l\x1b[32m✓\x1b[39m built\x1b[?25h";
        assert_eq!(strip_control_sequences(input), "\x1b[32m✓\x1b[39m built");
    }

    #[test]
    fn test_strip_control_sequences_drops_title_and_movement() {
        let input = "\x1b]0;title\x07\x1b[1A\x1b[2K\x1b[1;31mfail\x1b[0m";
        assert_eq!(strip_control_sequences(input), "\x1b[1;31mfail\x1b[0m");
    }

    #[test]
    fn test_preserve_unicode() {
        let input = "➜  Local:   http://localhost:5173/ 🚀";
        assert_eq!(strip_ansi_codes(input), input);
        assert_eq!(strip_control_sequences(input), input);
    }

    #[test]
    fn test_no_codes_and_empty() {
        assert_eq!(strip_ansi_codes("Plain text"), "Plain text");
        assert_eq!(strip_ansi_codes(""), "");
    }

    #[test]
    fn test_contains_ansi_codes() {
        assert!(contains_ansi_codes("\x1b[31mred\x1b[0m"));
        assert!(contains_ansi_codes("\x1b[?25l"));
        assert!(!contains_ansi_codes("plain text"));
        assert!(!contains_ansi_codes("[y/N]"));
    }

    #[test]
    fn test_after_line_reset() {
        assert_eq!(after_line_reset("⠋ a\x1b[1G\x1b[0K⠙ b"), Some("\x1b[0K⠙ b"));
        assert_eq!(after_line_reset("old\x1b[2Knew"), Some("new"));
        assert_eq!(after_line_reset("\r"), Some(""));
        assert_eq!(after_line_reset("\x1b[32mok\x1b[39m"), None);
    }
}
