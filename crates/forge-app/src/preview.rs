//! Preview surface state
//!
//! Tracks what the embedded frame should show. Every bind or refresh bumps a
//! load counter that is part of the frame's identity, so a frame bound to the
//! same URL twice is still recreated: a new dev server behind an unchanged
//! proxy URL needs a fresh load.

use std::str::FromStr;

use serde::Serialize;

use forge_core::{escape_html, render_html, DevServerState, ServerAddress, Theme};

use crate::supervisor::{SupervisorEvent, SupervisorSnapshot};

/// What the preview frame points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreviewTarget {
    /// A static build; no dev server involved
    Static { url: String },
    /// The sandbox dev server
    Live { address: ServerAddress },
}

impl PreviewTarget {
    pub fn url(&self) -> &str {
        match self {
            PreviewTarget::Static { url } => url,
            PreviewTarget::Live { address } => &address.url,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PreviewTarget::Live { .. })
    }
}

/// Identity and source of the frame to render
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameSpec {
    /// Changes on every load, even when `src` does not
    pub key: String,
    pub src: String,
}

impl FrameSpec {
    pub fn to_html(&self) -> String {
        format!(
            r#"<iframe src="{}" data-frame-key="{}" title="App preview" sandbox="allow-scripts allow-same-origin allow-forms allow-popups allow-modals"></iframe>"#,
            escape_html(&self.src),
            escape_html(&self.key)
        )
    }
}

/// What to draw over the frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    Loading { message: String, rich: bool },
    Error { message: String, detail: String },
}

impl Overlay {
    /// Overlay for a supervisor snapshot; `None` once the server is ready.
    pub fn from_snapshot(snapshot: &SupervisorSnapshot) -> Option<Self> {
        let status = &snapshot.status;
        match snapshot.state {
            DevServerState::Ready => None,
            DevServerState::InstallFailed | DevServerState::Crashed | DevServerState::Failed => {
                Some(Overlay::Error {
                    message: status.message.clone(),
                    detail: status.error_text.clone().unwrap_or_default(),
                })
            }
            _ => Some(Overlay::Loading {
                message: status.message.clone(),
                rich: status.is_rich_text,
            }),
        }
    }

    /// Markup for the overlay body. Rich text goes through the ANSI renderer,
    /// everything else is escaped.
    pub fn to_html(&self, theme: Theme) -> String {
        match self {
            Overlay::Loading { message, rich: true } => {
                format!(r#"<div class="overlay loading">{}</div>"#, render_html(message, theme))
            }
            Overlay::Loading { message, rich: false } => {
                format!(r#"<div class="overlay loading">{}</div>"#, escape_html(message))
            }
            Overlay::Error { message, detail } => format!(
                r#"<div class="overlay error"><p>{}</p><pre>{}</pre></div>"#,
                escape_html(message),
                render_html(detail, theme)
            ),
        }
    }
}

/// User actions offered by the preview toolbar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewAction {
    /// Reload the frame only
    Refresh,
    /// Remount, reinstall and start again
    Rebuild,
    /// Start the dev server again with the installed dependencies
    Restart,
}

impl FromStr for PreviewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refresh" | "r" => Ok(PreviewAction::Refresh),
            "rebuild" | "b" => Ok(PreviewAction::Rebuild),
            "restart" | "s" => Ok(PreviewAction::Restart),
            other => Err(format!("unknown preview action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreviewSurface {
    target: Option<PreviewTarget>,
    loads: u64,
}

impl PreviewSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface showing a static build from the start
    pub fn with_static(url: impl Into<String>) -> Self {
        let mut surface = Self::new();
        surface.bind(PreviewTarget::Static { url: url.into() });
        surface
    }

    /// Point the frame at `target` and force a fresh load.
    pub fn bind(&mut self, target: PreviewTarget) -> FrameSpec {
        self.target = Some(target);
        self.next_load()
    }

    /// Reload the current target. `None` when nothing is bound.
    pub fn refresh(&mut self) -> Option<FrameSpec> {
        self.target.as_ref()?;
        Some(self.next_load())
    }

    /// Drop the bound target, e.g. when the dev server goes away.
    pub fn unbind(&mut self) {
        self.target = None;
    }

    fn next_load(&mut self) -> FrameSpec {
        self.loads += 1;
        self.frame().unwrap_or_else(|| FrameSpec {
            key: format!("empty#{}", self.loads),
            src: "about:blank".to_string(),
        })
    }

    pub fn target(&self) -> Option<&PreviewTarget> {
        self.target.as_ref()
    }

    /// Number of loads requested so far
    pub fn load_count(&self) -> u64 {
        self.loads
    }

    pub fn frame(&self) -> Option<FrameSpec> {
        self.target.as_ref().map(|target| FrameSpec {
            key: format!("{}#{}", target.url(), self.loads),
            src: target.url().to_string(),
        })
    }

    /// Overlay for the live target; a static build never gets one.
    pub fn overlay(&self, snapshot: &SupervisorSnapshot) -> Option<Overlay> {
        match &self.target {
            Some(PreviewTarget::Static { .. }) => None,
            _ => Overlay::from_snapshot(snapshot),
        }
    }

    /// Follow supervisor events. Returns the frame when it must be (re)loaded.
    pub fn apply_event(&mut self, event: &SupervisorEvent) -> Option<FrameSpec> {
        match event {
            SupervisorEvent::Ready(address) => Some(self.bind(PreviewTarget::Live {
                address: address.clone(),
            })),
            SupervisorEvent::RefreshPreview => {
                if self.target.as_ref().is_some_and(PreviewTarget::is_live) {
                    self.refresh()
                } else {
                    None
                }
            }
            SupervisorEvent::StateChanged { to, .. }
                if *to != DevServerState::Ready
                    && self.target.as_ref().is_some_and(PreviewTarget::is_live) =>
            {
                // The old server is gone; its URL must not be shown again
                // until a new ready signal arrives.
                self.unbind();
                None
            }
            _ => None,
        }
    }
}
