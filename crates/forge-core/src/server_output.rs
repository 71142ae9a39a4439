//! Pattern detection on dev-server and installer output
//!
//! Everything here works on ANSI-stripped text and is best-effort: dev tools
//! change their banners between versions, which is why the supervisor also
//! carries a fallback timer.

use regex::Regex;
use std::sync::LazyLock;

use crate::ansi::strip_ansi_codes;

/// Lines worth inspecting for a URL at all.
static READY_INDICATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)local:|localhost").expect("indicator regex is valid"));

/// URL patterns in priority order. Capture 1 is the URL, capture 2 the port.
static READY_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        // ➜  Local:   http://localhost:5173/
        Regex::new(r"(?i)Local:\s+(https?://[\w.\-\[\]]+(?::(\d+))?/?\S*)")
            .expect("labeled local url regex is valid"),
        // http://localhost:5173/
        Regex::new(r"(https?://localhost:(\d+)/)").expect("localhost url regex is valid"),
        // http://localhost:5173
        Regex::new(r"(https?://localhost:(\d+))").expect("bare localhost regex is valid"),
    ]
});

/// Interactive confirmations that a non-interactive process can never answer.
static PROMPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        \[y/n\]                          # Continue? [y/N]
        | \(y/n\)                        # Proceed (y/n)
        | \[yes/no\]
        | ok\ to\ proceed\?              # npx: Ok to proceed? (y)
        | \?\s.*\s›                      # prompts-style: ? Port 5173 is in use ›
        | press\ any\ key
        ",
    )
    .expect("prompt regex is valid")
});

/// A ready signal found in dev-server output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySignal {
    /// The URL exactly as the server printed it
    pub url: String,
    /// Port parsed from the URL, if it had one
    pub port: Option<u16>,
}

/// Look for a ready signal in one output chunk.
///
/// Lines carrying an indicator token are tried against each pattern in
/// priority order; the first match wins.
///
/// # Examples
///
/// ```
/// use forge_core::detect_ready_signal;
///
/// let signal = detect_ready_signal("  ➜  Local:   http://localhost:5173/\n").unwrap();
/// assert_eq!(signal.port, Some(5173));
/// ```
pub fn detect_ready_signal(chunk: &str) -> Option<ReadySignal> {
    let text = strip_ansi_codes(chunk);

    for line in text.lines().filter(|l| READY_INDICATOR.is_match(l)) {
        for pattern in READY_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(line) {
                let url = caps.get(1)?.as_str().to_string();
                let port = caps.get(2).and_then(|p| p.as_str().parse::<u16>().ok());
                return Some(ReadySignal { url, port });
            }
        }
    }

    None
}

/// Look for an interactive prompt in one output chunk.
///
/// Returns the (stripped, trimmed) line containing the prompt.
pub fn detect_prompt(chunk: &str) -> Option<String> {
    let text = strip_ansi_codes(chunk);
    text.lines()
        .find(|line| PROMPT_PATTERN.is_match(line))
        .map(|line| line.trim().to_string())
}
