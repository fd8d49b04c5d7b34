//! Messages crossing the transport boundary: inbound events and outbound replies.

/// One message observed on a channel. Built by the transport adapter, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Conversation the message arrived on (Slack channel id, Telegram chat id).
    pub conversation_id: String,
    /// Sender id; `None` when the transport generated the message itself.
    pub author_id: Option<String>,
    /// Raw message body; may be empty.
    pub text: String,
    /// True when the transport marks the message as sent by a bot or app.
    pub is_automated: bool,
}

impl InboundEvent {
    /// A human-authored message.
    pub fn from_user(
        conversation_id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            author_id: Some(author_id.into()),
            text: text.into(),
            is_automated: false,
        }
    }
}

/// Outbound reply. Always addressed to the conversation of the triggering event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    pub conversation_id: String,
    pub body: String,
}

impl ReplyMessage {
    pub fn to_event(event: &InboundEvent, body: String) -> Self {
        Self {
            conversation_id: event.conversation_id.clone(),
            body,
        }
    }
}
