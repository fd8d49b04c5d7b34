//! Channel handle: the operations the dispatcher needs from a running transport.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{method} failed: {detail}")]
    Api { method: &'static str, detail: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("{0} is not supported by this channel")]
    Unsupported(&'static str),
}

impl ChannelError {
    pub(crate) fn api(method: &'static str, detail: impl Into<String>) -> Self {
        Self::Api {
            method,
            detail: detail.into(),
        }
    }
}

/// Handle to a running channel (stop, send message, look up display names).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "slack").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message to a conversation.
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
    /// Resolve a human-readable name for a sender id. Default returns an error.
    async fn resolve_display_name(&self, _author_id: &str) -> Result<String, ChannelError> {
        Err(ChannelError::Unsupported("display name lookup"))
    }
}
