//! Telegram channel: long-poll getUpdates and sendMessage via Bot API.

use crate::channels::handle::{ChannelError, ChannelHandle};
use crate::channels::message::InboundEvent;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

const LONG_POLL_TIMEOUT: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

/// getChat result; only the fields used for display names.
#[derive(Debug, Deserialize)]
struct TelegramChatInfo {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl TelegramUpdate {
    /// Text messages become inbound events; everything else (stickers, joins, edits) is ignored.
    pub fn into_event(self) -> Option<InboundEvent> {
        let msg = self.message?;
        let text = msg.text?;
        Some(InboundEvent {
            conversation_id: msg.chat.id.to_string(),
            author_id: msg.from.as_ref().map(|u| u.id.to_string()),
            text,
            is_automated: msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false),
        })
    }
}

impl TelegramChatInfo {
    fn display_name(&self) -> Option<String> {
        if let Some(u) = self.username.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(u.to_string());
        }
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            None
        } else {
            Some(full)
        }
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: String,
    api_base: String,
    running: AtomicBool,
    shutdown: Notify,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: String, api_base: String) -> Self {
        Self {
            id: "telegram".to_string(),
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the getUpdates long-poll loop and forward events to the dispatcher. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates. Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let url = format!("{}?timeout={}", self.method_url("getUpdates"), timeout_secs);
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api("getUpdates", format!("{} {}", status, body)));
        }
        let data: ApiResponse<Vec<TelegramUpdate>> = res.json().await?;
        if !data.ok {
            return Err(ChannelError::api(
                "getUpdates",
                data.description.unwrap_or_else(|| "ok: false".to_string()),
            ));
        }
        let updates = data.result.unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Fetch only the newest pending update and return the offset after it, so messages
    /// sent while the bridge was offline are never executed.
    pub async fn skip_pending_updates(&self) -> Result<Option<i64>, ChannelError> {
        let (updates, next) = self.get_updates(Some(-1), 0).await?;
        if !updates.is_empty() {
            log::info!("telegram: skipped pending updates up to offset {:?}", next);
        }
        Ok(next)
    }

    /// Retry [`Self::skip_pending_updates`] until it succeeds. Polling without the
    /// skip offset would replay the offline backlog, so there is no fallback.
    /// Returns `None` when the channel is stopped first.
    async fn skip_backlog(&self) -> Option<Option<i64>> {
        while self.running() {
            let skipped = tokio::select! {
                _ = self.shutdown.notified() => return None,
                skipped = self.skip_pending_updates() => skipped,
            };
            match skipped {
                Ok(next) => return Some(next),
                Err(e) => {
                    log::warn!("telegram: could not skip pending updates, retrying: {}", e);
                    tokio::select! {
                        _ = self.shutdown.notified() => return None,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
        None
    }

    /// Remove any webhook so the bot can use getUpdates.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let res = self
            .client
            .post(self.method_url("deleteWebhook"))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api("deleteWebhook", format!("{} {}", status, body)));
        }
        Ok(())
    }

    /// Send a reply via sendMessage. Fenced blocks are sent as HTML `<pre>` so
    /// clients render them preformatted instead of showing the fence characters.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": fences_to_html(text),
            "parse_mode": "HTML",
        });
        let res = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api("sendMessage", format!("{} {}", status, body)));
        }
        Ok(())
    }

    /// Look up a user's @username (or full name) via getChat.
    pub async fn get_display_name(&self, user_id: &str) -> Result<String, ChannelError> {
        let res = self
            .client
            .get(self.method_url("getChat"))
            .query(&[("chat_id", user_id)])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api("getChat", format!("{} {}", status, body)));
        }
        let data: ApiResponse<TelegramChatInfo> = res.json().await?;
        data.result
            .filter(|_| data.ok)
            .and_then(|info| info.display_name())
            .ok_or_else(|| ChannelError::api("getChat", "no name in response"))
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Rewrite "```" fence lines as `<pre>` tags, escaping everything else for HTML parse mode.
fn fences_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_pre = false;
    let mut line_start = true;
    for line in text.split('\n') {
        if line == "```" {
            if in_pre {
                out.push_str("</pre>");
            } else {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str("<pre>");
            }
            in_pre = !in_pre;
            line_start = in_pre;
            continue;
        }
        if !line_start {
            out.push('\n');
        }
        out.push_str(&escape_html(line));
        line_start = false;
    }
    if in_pre {
        out.push_str("</pre>");
    }
    out
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundEvent>) {
    if let Err(e) = channel.delete_webhook().await {
        log::debug!("telegram deleteWebhook before polling: {}", e);
    }
    let Some(mut offset) = channel.skip_backlog().await else {
        log::info!("telegram channel: stopped before polling started");
        return;
    };
    while channel.running() {
        let polled = tokio::select! {
            _ = channel.shutdown.notified() => break,
            polled = channel.get_updates(offset, LONG_POLL_TIMEOUT) => polled,
        };
        match polled {
            Ok((updates, next)) => {
                if next.is_some() {
                    offset = next;
                }
                for event in updates.into_iter().filter_map(TelegramUpdate::into_event) {
                    if inbound_tx.send(event).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("telegram getUpdates error: {}", e);
                tokio::select! {
                    _ = channel.shutdown.notified() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }

    async fn resolve_display_name(&self, author_id: &str) -> Result<String, ChannelError> {
        self.get_display_name(author_id).await
    }
}
