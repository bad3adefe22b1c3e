//! Appwrite Realtime websocket subscriptions
//!
//! One socket per subscription. Frames are JSON objects tagged by `type`:
//! `connected`, `event`, `error`, `pong`. The client pings every 20s.
//! Transport failures reconnect with exponential backoff (1s, 2s, 4s, ...
//! capped at 64s); only an `error` frame from the server ends the stream.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::backend::{BackendError, BackendResult, Change, ChangeKind, ChangeStream, Topic};

const HEARTBEAT: Duration = Duration::from_secs(20);
const MAX_BACKOFF_SECS: u64 = 64;
const STABLE_AFTER: Duration = Duration::from_secs(60);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Everything needed to open the socket.
#[derive(Debug, Clone)]
pub struct RealtimeTarget {
    pub endpoint: String,
    pub project: String,
    pub channel: String,
    pub cookie: Option<String>,
}

impl RealtimeTarget {
    fn ws_url(&self) -> String {
        let base = self
            .endpoint
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{}/realtime?project={}&channels[]={}",
            base, self.project, self.channel
        )
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EventData {
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Reason the inner connection loop exited.
enum DisconnectReason {
    /// The subscriber dropped its stream. Do not reconnect.
    Closed,
    /// The server rejected the subscription. Surface and stop.
    Rejected(String),
    /// Transport error or server-initiated close. Reconnect.
    Error(anyhow::Error),
}

/// Open a subscription in the background and return its change stream.
pub fn spawn_subscription(target: RealtimeTarget, topic: Topic) -> ChangeStream {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(target, topic, tx));
    rx
}

async fn run(target: RealtimeTarget, topic: Topic, tx: mpsc::UnboundedSender<BackendResult<Change>>) {
    let mut backoff = 1u64;

    loop {
        let started = Instant::now();
        let reason = tokio::select! {
            reason = connect_and_listen(&target, &topic, &tx) => reason,
            _ = tx.closed() => DisconnectReason::Closed,
        };

        match reason {
            DisconnectReason::Closed => {
                tracing::debug!("Realtime subscriber for {:?} went away", topic);
                return;
            }
            DisconnectReason::Rejected(msg) => {
                tracing::warn!("Realtime subscription for {:?} rejected: {}", topic, msg);
                let _ = tx.send(Err(BackendError::Realtime(msg)));
                return;
            }
            DisconnectReason::Error(e) => {
                if started.elapsed() >= STABLE_AFTER {
                    backoff = 1;
                }
                tracing::warn!("Realtime disconnected: {:#}. Reconnecting in {}s...", e, backoff);
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(backoff)) => {}
                    _ = tx.closed() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            }
        }
    }
}

async fn connect(target: &RealtimeTarget) -> anyhow::Result<WsStream> {
    let url = target.ws_url();
    tracing::info!("Connecting realtime socket to {}", url);

    let mut request = url.as_str().into_client_request()?;
    if let Some(ref cookie) = target.cookie {
        request
            .headers_mut()
            .insert("Cookie", HeaderValue::from_str(cookie)?);
    }
    let (stream, response) = connect_async(request).await?;
    tracing::debug!("Realtime socket connected (status={})", response.status());
    Ok(stream)
}

async fn connect_and_listen(
    target: &RealtimeTarget,
    topic: &Topic,
    tx: &mpsc::UnboundedSender<BackendResult<Change>>,
) -> DisconnectReason {
    let mut ws = match connect(target).await {
        Ok(ws) => ws,
        Err(e) => return DisconnectReason::Error(e),
    };

    let mut heartbeat = time::interval(HEARTBEAT);
    heartbeat.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        return DisconnectReason::Error(anyhow::anyhow!("closed by server: {:?}", frame));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return DisconnectReason::Error(e.into()),
                    None => return DisconnectReason::Error(anyhow::anyhow!("socket ended")),
                };
                match handle_frame(&text, topic) {
                    FrameOutcome::Change(change) => {
                        if tx.send(Ok(change)).is_err() {
                            return DisconnectReason::Closed;
                        }
                    }
                    FrameOutcome::Rejected(msg) => return DisconnectReason::Rejected(msg),
                    FrameOutcome::Ignored => {}
                }
            }
            _ = heartbeat.tick() => {
                let ping = serde_json::json!({"type": "ping"}).to_string();
                if let Err(e) = ws.send(WsMessage::Text(ping)).await {
                    return DisconnectReason::Error(anyhow::Error::new(e).context("heartbeat send failed"));
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum FrameOutcome {
    Change(Change),
    Rejected(String),
    Ignored,
}

fn handle_frame(text: &str, topic: &Topic) -> FrameOutcome {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!("Unparseable realtime frame ({}): {}", e, text);
            return FrameOutcome::Ignored;
        }
    };

    match frame.kind.as_str() {
        "event" => {
            let data: EventData = match serde_json::from_value(frame.data) {
                Ok(d) => d,
                Err(_) => return FrameOutcome::Ignored,
            };
            if !matches_topic(&data.payload, topic) {
                return FrameOutcome::Ignored;
            }
            match change_from_event(&data) {
                Some(change) => FrameOutcome::Change(change),
                None => FrameOutcome::Ignored,
            }
        }
        "error" => {
            let msg = frame
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown realtime error")
                .to_string();
            FrameOutcome::Rejected(msg)
        }
        "connected" => {
            tracing::debug!("Realtime subscription active for {:?}", topic);
            FrameOutcome::Ignored
        }
        _ => FrameOutcome::Ignored,
    }
}

/// The channel covers a whole collection; keep only events for our topic.
///
/// Room events are never filtered on the payload: the server only delivers
/// rooms the subscriber can read, and an update that removes the subscriber
/// lists the remaining participants only, yet must still trigger a refetch.
fn matches_topic(payload: &serde_json::Value, topic: &Topic) -> bool {
    match topic {
        Topic::Messages { room_id } => payload
            .get("roomId")
            .and_then(|r| r.as_str())
            .map_or(false, |r| r == room_id),
        Topic::Rooms { .. } => true,
    }
}

/// Events look like `databases.main.collections.messages.documents.<id>.create`.
fn change_from_event(data: &EventData) -> Option<Change> {
    let document_id = data
        .payload
        .get("$id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    data.events.iter().find_map(|event| {
        let kind = match event.rsplit('.').next()? {
            "create" => ChangeKind::Created,
            "update" => ChangeKind::Updated,
            "delete" => ChangeKind::Deleted,
            _ => return None,
        };
        Some(Change {
            kind,
            document_id: document_id.clone(),
        })
    })
}
