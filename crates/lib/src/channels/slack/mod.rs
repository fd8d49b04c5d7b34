//! Slack channel over Socket Mode: a WebSocket session receives event envelopes,
//! every envelope is acknowledged before it is handled, and replies go out through
//! the Web API (`chat.postMessage`).

mod api;

use crate::channels::handle::{ChannelError, ChannelHandle};
use crate::channels::message::InboundEvent;
use api::SlackApiClient;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Message subtypes that still carry a user-typed command.
const COMMAND_SUBTYPES: &[&str] = &["bot_message", "thread_broadcast", "file_share", "me_message"];

#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    event: Option<MessageEvent>,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

/// Why a socket session ended.
enum SessionEnd {
    /// Slack asked us to reconnect or the socket closed.
    Reconnect,
    /// The channel was stopped.
    Stopped,
    /// Nobody is receiving inbound events any more.
    InboundClosed,
}

/// Slack channel connector.
pub struct SlackChannel {
    id: String,
    api: SlackApiClient,
    running: AtomicBool,
    shutdown: Notify,
}

impl SlackChannel {
    pub fn new(api_base: &str, app_token: &str, bot_token: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            id: "slack".to_string(),
            api: SlackApiClient::new(api_base, app_token, bot_token)?,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the Socket Mode loop and forward message events to the dispatcher.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("slack channel: starting socket mode loop");
        tokio::spawn(async move {
            run_socket_loop(self, inbound_tx).await;
        })
    }

    async fn run_session(
        &self,
        socket_url: &str,
        bot_user_id: Option<&str>,
        inbound_tx: &mpsc::Sender<InboundEvent>,
    ) -> Result<SessionEnd, ChannelError> {
        let (stream, _response) = connect_async(socket_url).await?;
        let (mut sink, mut source) = stream.split();
        log::info!("slack socket connected");

        loop {
            let message = tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Stopped);
                }
                next = source.next() => match next {
                    Some(message) => message?,
                    None => return Ok(SessionEnd::Reconnect),
                },
            };
            let envelope = match parse_socket_envelope(message) {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("slack: dropping unreadable socket frame: {}", e);
                    continue;
                }
            };
            if let Some(envelope_id) = envelope.envelope_id.as_deref() {
                let ack = json!({ "envelope_id": envelope_id }).to_string();
                sink.send(WsMessage::Text(ack)).await?;
            }
            match envelope.envelope_type.as_str() {
                "hello" => log::debug!("slack socket hello received"),
                "disconnect" => {
                    log::info!("slack requested reconnect");
                    return Ok(SessionEnd::Reconnect);
                }
                "events_api" => {
                    if let Some(event) = normalize_envelope(&envelope, bot_user_id) {
                        if inbound_tx.send(event).await.is_err() {
                            return Ok(SessionEnd::InboundClosed);
                        }
                    }
                }
                other => log::trace!("slack: ignoring {} envelope", other),
            }
        }
    }

    async fn wait_before_reconnect(&self) {
        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn run_socket_loop(channel: Arc<SlackChannel>, inbound_tx: mpsc::Sender<InboundEvent>) {
    let mut bot_user_id: Option<String> = None;
    while channel.running() {
        if bot_user_id.is_none() {
            match channel.api.resolve_bot_user_id().await {
                Ok(id) => {
                    log::debug!("slack bot user id: {}", id);
                    bot_user_id = Some(id);
                }
                Err(e) => log::warn!("slack auth.test failed: {}", e),
            }
        }
        let socket_url = match channel.api.open_socket_connection().await {
            Ok(url) => url,
            Err(e) => {
                log::warn!("slack: failed to open socket connection: {}", e);
                channel.wait_before_reconnect().await;
                continue;
            }
        };
        match channel
            .run_session(&socket_url, bot_user_id.as_deref(), &inbound_tx)
            .await
        {
            Ok(SessionEnd::Stopped) => break,
            Ok(SessionEnd::InboundClosed) => {
                log::debug!("slack: inbound channel closed, stopping loop");
                return;
            }
            Ok(SessionEnd::Reconnect) => {}
            Err(e) => log::warn!("slack socket session error: {}", e),
        }
        if channel.running() {
            channel.wait_before_reconnect().await;
        }
    }
    log::info!("slack channel: socket mode loop stopped");
}

fn parse_socket_envelope(message: WsMessage) -> Result<Option<SocketEnvelope>, serde_json::Error> {
    let text = match message {
        WsMessage::Text(text) => text,
        WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None)
        }
    };
    serde_json::from_str(&text).map(Some)
}

/// Turn an `events_api` envelope into an inbound event. Only plain user messages
/// (and bot messages, flagged as automated) pass; edits, deletions and joins do not.
fn normalize_envelope(envelope: &SocketEnvelope, bot_user_id: Option<&str>) -> Option<InboundEvent> {
    if envelope.envelope_type != "events_api" {
        return None;
    }
    let callback: EventCallback = match serde_json::from_value(envelope.payload.clone()) {
        Ok(callback) => callback,
        Err(e) => {
            log::warn!("slack: unreadable event payload: {}", e);
            return None;
        }
    };
    if callback.callback_type != "event_callback" {
        return None;
    }
    let event = callback.event?;
    if event.event_type != "message" {
        return None;
    }
    if let Some(subtype) = event.subtype.as_deref() {
        if !COMMAND_SUBTYPES.contains(&subtype) {
            return None;
        }
    }
    let conversation_id = event.channel.filter(|c| !c.trim().is_empty())?;
    let author_id = event.user.filter(|u| !u.trim().is_empty());
    let is_automated = event.subtype.as_deref() == Some("bot_message")
        || event.bot_id.is_some()
        || (author_id.is_some() && author_id.as_deref() == bot_user_id);
    Some(InboundEvent {
        conversation_id,
        author_id,
        text: unescape_slack_text(event.text.as_deref().unwrap_or_default()),
        is_automated,
    })
}

/// Undo Slack's message escaping so the text reaches the shell as typed:
/// `<https://x|x>` becomes `x`, `<https://x>` becomes `https://x`, and
/// `&lt;`, `&gt;`, `&amp;` are decoded. Mentions like `<@U1>` are left alone.
pub fn unescape_slack_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('>') {
            Some(end) => {
                let inner = &after[..end];
                out.push_str(&unwrap_link(inner).unwrap_or_else(|| format!("<{}>", inner)));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn unwrap_link(inner: &str) -> Option<String> {
    let (target, label) = match inner.split_once('|') {
        Some((target, label)) => (target, Some(label)),
        None => (inner, None),
    };
    let is_link = ["http://", "https://", "mailto:", "tel:"]
        .iter()
        .any(|scheme| target.starts_with(scheme));
    if !is_link {
        return None;
    }
    Some(label.unwrap_or(target).to_string())
}

#[async_trait]
impl ChannelHandle for SlackChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        self.api.post_message(conversation_id, text).await
    }

    async fn resolve_display_name(&self, author_id: &str) -> Result<String, ChannelError> {
        self.api.user_display_name(author_id).await
    }
}
