//! ANSI → HTML conversion for terminal output panels
//!
//! Converts a raw output chunk into markup that is safe to insert into a
//! dedicated container element. Text is HTML-escaped; SGR colour codes become
//! inline-styled `<span>`s using a fixed palette per theme. Non-colour escape
//! sequences are removed first via [`strip_control_sequences`].
//!
//! Each chunk is converted on its own. Callers append converted chunks and
//! never splice raw text into converted markup.

use regex::Regex;
use std::sync::LazyLock;

use crate::ansi::strip_control_sequences;
use crate::types::Theme;

/// Palette for light backgrounds, indexed by ANSI colour 0-15.
pub const LIGHT_PALETTE: [&str; 16] = [
    "#24292f", "#cf222e", "#116329", "#4d2d00", "#0969da", "#8250df", "#1b7c83", "#6e7781",
    "#57606a", "#a40e26", "#1a7f37", "#633c01", "#218bff", "#a475f9", "#3192aa", "#8c959f",
];

/// Palette for dark backgrounds, indexed by ANSI colour 0-15.
pub const DARK_PALETTE: [&str; 16] = [
    "#6e7681", "#ff7b72", "#3fb950", "#d29922", "#58a6ff", "#bc8cff", "#39c5cf", "#b1bac4",
    "#8b949e", "#ffa198", "#56d364", "#e3b341", "#79c0ff", "#d2a8ff", "#56d4dd", "#ffffff",
];

const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

static SGR_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[([0-9;]*)m").expect("SGR regex pattern is valid"));

/// A terminal colour before palette resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermColor {
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl TermColor {
    fn to_hex(self, palette: &[&str; 16]) -> String {
        match self {
            TermColor::Indexed(idx) if idx < 16 => palette[idx as usize].to_string(),
            TermColor::Indexed(idx) if idx < 232 => {
                let cube = idx - 16;
                let r = CUBE_LEVELS[(cube / 36) as usize];
                let g = CUBE_LEVELS[((cube / 6) % 6) as usize];
                let b = CUBE_LEVELS[(cube % 6) as usize];
                format!("#{:02x}{:02x}{:02x}", r, g, b)
            }
            TermColor::Indexed(idx) => {
                let level = 8 + 10 * (idx - 232);
                format!("#{:02x}{:02x}{:02x}", level, level, level)
            }
            TermColor::Rgb(r, g, b) => format!("#{:02x}{:02x}{:02x}", r, g, b),
        }
    }
}

/// Current graphic rendition while walking a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SgrState {
    fg: Option<TermColor>,
    bg: Option<TermColor>,
    bold: bool,
    dim: bool,
    italic: bool,
    underline: bool,
}

impl SgrState {
    fn is_plain(&self) -> bool {
        *self == SgrState::default()
    }

    /// Apply the parameter list of one `ESC [ ... m` sequence.
    fn apply(&mut self, params: &str) {
        let codes: Vec<u16> = if params.is_empty() {
            vec![0]
        } else {
            params
                .split(';')
                .map(|p| p.parse::<u16>().unwrap_or(0))
                .collect()
        };

        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                0 => *self = SgrState::default(),
                1 => self.bold = true,
                2 => self.dim = true,
                3 => self.italic = true,
                4 => self.underline = true,
                22 => {
                    self.bold = false;
                    self.dim = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                n @ 30..=37 => self.fg = Some(TermColor::Indexed((n - 30) as u8)),
                38 => {
                    let (color, consumed) = parse_extended_color(&codes[i + 1..]);
                    if color.is_some() {
                        self.fg = color;
                    }
                    i += consumed;
                }
                39 => self.fg = None,
                n @ 40..=47 => self.bg = Some(TermColor::Indexed((n - 40) as u8)),
                48 => {
                    let (color, consumed) = parse_extended_color(&codes[i + 1..]);
                    if color.is_some() {
                        self.bg = color;
                    }
                    i += consumed;
                }
                49 => self.bg = None,
                n @ 90..=97 => self.fg = Some(TermColor::Indexed((n - 90 + 8) as u8)),
                n @ 100..=107 => self.bg = Some(TermColor::Indexed((n - 100 + 8) as u8)),
                _ => {}
            }
            i += 1;
        }
    }

    fn css(&self, palette: &[&str; 16]) -> String {
        let mut rules = Vec::new();
        if let Some(fg) = self.fg {
            rules.push(format!("color:{}", fg.to_hex(palette)));
        }
        if let Some(bg) = self.bg {
            rules.push(format!("background-color:{}", bg.to_hex(palette)));
        }
        if self.bold {
            rules.push("font-weight:bold".to_string());
        }
        if self.dim {
            rules.push("opacity:0.7".to_string());
        }
        if self.italic {
            rules.push("font-style:italic".to_string());
        }
        if self.underline {
            rules.push("text-decoration:underline".to_string());
        }
        rules.join(";")
    }
}

/// Parse the tail of a 38/48 sequence (`5;n` or `2;r;g;b`).
///
/// Returns the colour (if well-formed) and how many codes were consumed.
fn parse_extended_color(rest: &[u16]) -> (Option<TermColor>, usize) {
    match rest {
        [5, idx, ..] => (Some(TermColor::Indexed((*idx).min(255) as u8)), 2),
        [2, r, g, b, ..] => (
            Some(TermColor::Rgb(
                (*r).min(255) as u8,
                (*g).min(255) as u8,
                (*b).min(255) as u8,
            )),
            4,
        ),
        [5] | [2, ..] => (None, rest.len()),
        _ => (None, 0),
    }
}

/// Escape text for insertion into HTML element content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn push_segment(out: &mut String, text: &str, state: &SgrState, palette: &[&str; 16]) {
    if text.is_empty() {
        return;
    }
    let escaped = escape_html(text);
    if state.is_plain() {
        out.push_str(&escaped);
    } else {
        out.push_str("<span style=\"");
        out.push_str(&state.css(palette));
        out.push_str("\">");
        out.push_str(&escaped);
        out.push_str("</span>");
    }
}

/// Convert one raw output chunk to HTML for the given theme.
///
/// # Examples
///
/// ```
/// use forge_core::{render_html, Theme};
///
/// let html = render_html("\x1b[31m<fail>\x1b[0m ok", Theme::Dark);
/// assert_eq!(html, "<span style=\"color:#ff7b72\">&lt;fail&gt;</span> ok");
/// ```
pub fn render_html(chunk: &str, theme: Theme) -> String {
    let cleaned = strip_control_sequences(chunk);
    let palette = match theme {
        Theme::Light => &LIGHT_PALETTE,
        Theme::Dark => &DARK_PALETTE,
    };

    let mut out = String::with_capacity(cleaned.len() + 16);
    let mut state = SgrState::default();
    let mut last = 0;

    for caps in SGR_SEQUENCE.captures_iter(&cleaned) {
        let Some(whole) = caps.get(0) else { continue };
        push_segment(&mut out, &cleaned[last..whole.start()], &state, palette);
        state.apply(caps.get(1).map_or("", |m| m.as_str()));
        last = whole.end();
    }
    push_segment(&mut out, &cleaned[last..], &state, palette);

    out
}

/// A chunk rendered for both themes, so a theme switch needs no re-parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedOutput {
    pub light: String,
    pub dark: String,
}

impl RenderedOutput {
    pub fn render(chunk: &str) -> Self {
        Self {
            light: render_html(chunk, Theme::Light),
            dark: render_html(chunk, Theme::Dark),
        }
    }

    /// Markup for the active theme
    pub fn for_theme(&self, theme: Theme) -> &str {
        match theme {
            Theme::Light => &self.light,
            Theme::Dark => &self.dark,
        }
    }
}
