//! Project change notifications over server-sent events
//!
//! The stream pushes `connected`, `refresh` and `heartbeat` messages. Only
//! `refresh` is forwarded. A dropped connection is retried with exponential
//! backoff a few times, then the client gives up without reporting anything:
//! the preview still works, it just stops reloading on remote edits.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use url::Url;

use forge_core::prelude::*;
use forge_core::ProjectStreamMessage;

use crate::config::RemoteSettings;

/// One dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Works on raw bytes so a chunk boundary inside a multi-byte character
/// is harmless; lines are decoded only once complete.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => trace!("Ignoring SSE field '{}'", field),
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Interpret a frame as a project stream message.
///
/// The payload's own `type` wins; the SSE event name is the fallback for
/// servers that only name the event.
pub fn decode_frame(frame: &SseFrame) -> Option<ProjectStreamMessage> {
    if let Ok(message) = serde_json::from_str::<ProjectStreamMessage>(&frame.data) {
        return Some(message);
    }

    match frame.event.as_deref() {
        Some("connected") => Some(ProjectStreamMessage::Connected),
        Some("heartbeat") => Some(ProjectStreamMessage::Heartbeat),
        Some("refresh") => {
            let file = serde_json::from_str::<serde_json::Value>(&frame.data)
                .ok()
                .and_then(|v| v.get("file").and_then(|f| f.as_str()).map(str::to_string));
            Some(ProjectStreamMessage::Refresh { file })
        }
        _ => None,
    }
}

/// Backoff schedule for reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

impl From<&RemoteSettings> for ReconnectPolicy {
    fn from(settings: &RemoteSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.reconnect_base_ms),
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based); `None` to give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1)?;
        self.base.checked_mul(factor)
    }
}

/// Why one connection ended
enum ConnectionEnd {
    /// Stream ended or failed after delivering at least one frame
    Dropped { delivered: bool },
    Shutdown,
    /// Nobody is listening for refreshes anymore
    Closed,
}

/// Follow the event stream until shutdown or the retries run out.
pub async fn run_event_stream(
    url: Url,
    policy: ReconnectPolicy,
    refresh_tx: mpsc::Sender<ProjectStreamMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let mut attempts = 0;

    loop {
        match connect_once(&client, &url, &refresh_tx, &mut shutdown_rx).await {
            ConnectionEnd::Shutdown | ConnectionEnd::Closed => return,
            ConnectionEnd::Dropped { delivered } => {
                if delivered {
                    attempts = 0;
                }
            }
        }

        attempts += 1;
        let Some(delay) = policy.delay(attempts) else {
            debug!("Event stream {} gave up after {} reconnects", url, attempts - 1);
            return;
        };
        debug!("Event stream dropped, reconnect {} in {:?}", attempts, delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn connect_once(
    client: &reqwest::Client,
    url: &Url,
    refresh_tx: &mpsc::Sender<ProjectStreamMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let response = client
        .get(url.clone())
        .header("Accept", "text/event-stream")
        .send()
        .await;

    let response = match response {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            debug!("Event stream {} answered HTTP {}", url, r.status());
            return ConnectionEnd::Dropped { delivered: false };
        }
        Err(e) => {
            debug!("Event stream {} unreachable: {}", url, e);
            return ConnectionEnd::Dropped { delivered: false };
        }
    };

    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();
    let mut delivered = false;

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = shutdown_rx.changed() => return ConnectionEnd::Shutdown,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                debug!("Event stream read failed: {}", e);
                return ConnectionEnd::Dropped { delivered };
            }
            None => return ConnectionEnd::Dropped { delivered },
        };

        for frame in parser.push(&bytes) {
            delivered = true;
            match decode_frame(&frame) {
                Some(ProjectStreamMessage::Connected) => debug!("Event stream connected"),
                Some(ProjectStreamMessage::Heartbeat) => trace!("Event stream heartbeat"),
                Some(message @ ProjectStreamMessage::Refresh { .. }) => {
                    if refresh_tx.send(message).await.is_err() {
                        return ConnectionEnd::Closed;
                    }
                }
                None => trace!("Unrecognized event frame: {:?}", frame),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::{serve, StubResponse};

    #[test]
    fn test_parser_frames_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: refresh\r\nda").is_empty());
        let frames = parser.push(b"ta: {\"file\":\"src/App.tsx\"}\r\n\r\n");

        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("refresh".to_string()),
                data: r#"{"file":"src/App.tsx"}"#.to_string(),
            }]
        );
    }

    #[test]
    fn test_parser_comments_and_multiline_data() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": keep-alive\n\ndata: one\ndata: two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_parser_split_utf8() {
        let mut parser = SseParser::new();
        let bytes = "data: café\n\n".as_bytes();
        let (a, b) = bytes.split_at(10); // inside "é"
        assert!(parser.push(a).is_empty());
        assert_eq!(parser.push(b)[0].data, "café");
    }

    #[test]
    fn test_decode_frame() {
        let typed = SseFrame {
            event: None,
            data: r#"{"type":"refresh","file":"index.html"}"#.to_string(),
        };
        assert_eq!(
            decode_frame(&typed),
            Some(ProjectStreamMessage::Refresh {
                file: Some("index.html".to_string())
            })
        );

        let named = SseFrame {
            event: Some("heartbeat".to_string()),
            data: String::new(),
        };
        assert_eq!(decode_frame(&named), Some(ProjectStreamMessage::Heartbeat));

        let unknown = SseFrame {
            event: Some("deploy".to_string()),
            data: "{}".to_string(),
        };
        assert_eq!(decode_frame(&unknown), None);
    }

    #[test]
    fn test_reconnect_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay(4), None);
        assert_eq!(policy.delay(0), None);
    }

    #[tokio::test]
    async fn test_stream_forwards_refresh_then_gives_up() {
        let server = serve(vec![
            StubResponse::event_stream(
                "event: connected\ndata: {}\n\n: ping\n\ndata: {\"type\":\"refresh\",\"file\":\"src/App.tsx\"}\n\n",
            ),
            StubResponse::status(503),
        ])
        .await;

        let (refresh_tx, mut refresh_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = ReconnectPolicy {
            base: Duration::from_millis(1),
            max_attempts: 3,
        };

        let url = Url::parse(&format!("{}/events", server.base)).unwrap();
        run_event_stream(url, policy, refresh_tx, shutdown_rx).await;

        assert_eq!(
            refresh_rx.recv().await,
            Some(ProjectStreamMessage::Refresh {
                file: Some("src/App.tsx".to_string())
            })
        );
        // First connection plus three failed reconnects
        assert_eq!(server.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_stream_stops_on_shutdown() {
        let (refresh_tx, _refresh_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = ReconnectPolicy {
            base: Duration::from_secs(3600),
            max_attempts: 3,
        };

        // Nothing listens on port 9 of the loopback interface
        let url = Url::parse("http://127.0.0.1:9/events").unwrap();
        let handle = tokio::spawn(run_event_stream(url, policy, refresh_tx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
