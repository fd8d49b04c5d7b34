//! Communication channels (Slack, Telegram).
//!
//! Each channel runs an inbound task that pushes [`InboundEvent`]s into an mpsc
//! sender and exposes a [`ChannelHandle`] for replies and identity lookups.

mod handle;
mod message;
mod slack;
mod telegram;

pub use handle::{ChannelError, ChannelHandle};
pub use message::{InboundEvent, ReplyMessage};
pub use slack::{unescape_slack_text, SlackChannel};
pub use telegram::{TelegramChannel, TelegramUpdate};
