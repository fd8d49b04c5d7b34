//! Dispatcher: filter, execute, format and reply, one event at a time.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::channels::{ChannelHandle, InboundEvent, ReplyMessage};
use crate::config::{BridgeSettings, LocalSettings};
use crate::exec::CommandExecutor;
use crate::filter::should_process;
use crate::format::ResponseFormatter;

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Filtered out; nothing ran, nothing was sent.
    Skipped,
    /// Command ran and the reply was sent.
    Delivered(ReplyMessage),
    /// Command ran but sending the reply failed. Not retried.
    DeliveryFailed(ReplyMessage),
}

/// Owns the executor and formatter for the lifetime of the bridge.
pub struct Dispatcher {
    conversation_id: String,
    executor: CommandExecutor,
    formatter: ResponseFormatter,
}

impl Dispatcher {
    pub fn new(conversation_id: impl Into<String>, executor: CommandExecutor, formatter: ResponseFormatter) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            executor,
            formatter,
        }
    }

    /// Build from local settings, detecting the prompt context when needed.
    pub fn from_local(conversation_id: impl Into<String>, local: &LocalSettings) -> Self {
        Self::new(
            conversation_id,
            CommandExecutor::new(&local.command),
            ResponseFormatter::from_config(&local.reply, local.command.working_dir.as_deref()),
        )
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::from_local(settings.conversation_id.clone(), &settings.local)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Handle one event to completion. Errors never escape: a failed send is logged
    /// and reported in the outcome.
    pub async fn handle_event(&self, channel: &dyn ChannelHandle, event: InboundEvent) -> DispatchOutcome {
        if !should_process(&event, &self.conversation_id) {
            log::trace!(
                "ignoring message in {} (automated: {})",
                event.conversation_id,
                event.is_automated
            );
            return DispatchOutcome::Skipped;
        }

        log::info!(
            "running command from {}: {:?}",
            event.author_id.as_deref().unwrap_or("?"),
            event.text
        );
        let result = self.executor.execute(&event.text).await;
        if result.is_timed_out() {
            log::warn!("command timed out after {:?}: {:?}", self.executor.timeout(), event.text);
        }

        let author = if self.formatter.wants_author() {
            self.author_name(channel, &event).await
        } else {
            None
        };
        let body = self.formatter.format(&event, &result, author.as_deref());
        let reply = ReplyMessage::to_event(&event, body);

        match channel.send_message(&reply.conversation_id, &reply.body).await {
            Ok(()) => {
                log::debug!("reply sent to {} via {}", reply.conversation_id, channel.id());
                DispatchOutcome::Delivered(reply)
            }
            Err(e) => {
                log::error!("{} send to {} failed: {}", channel.id(), reply.conversation_id, e);
                DispatchOutcome::DeliveryFailed(reply)
            }
        }
    }

    async fn author_name(&self, channel: &dyn ChannelHandle, event: &InboundEvent) -> Option<String> {
        let author_id = event.author_id.as_deref()?;
        match channel.resolve_display_name(author_id).await {
            Ok(name) => Some(name),
            Err(e) => {
                log::warn!("could not resolve display name for {}: {}", author_id, e);
                None
            }
        }
    }

    /// Consume events until the sender side closes. Strictly sequential: the next
    /// event is not read until the previous reply has been sent (or has failed).
    pub async fn run(&self, mut inbound_rx: mpsc::Receiver<InboundEvent>, channel: Arc<dyn ChannelHandle>) {
        while let Some(event) = inbound_rx.recv().await {
            self.handle_event(channel.as_ref(), event).await;
        }
        log::debug!("inbound queue closed, dispatcher stopping");
    }
}
