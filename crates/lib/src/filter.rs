//! Event filter: which inbound events are eligible to run.

use crate::channels::InboundEvent;

/// True when the event came from the authorized conversation and was written by a person.
/// Empty text passes; the executor turns it into a no-op.
pub fn should_process(event: &InboundEvent, authorized_conversation_id: &str) -> bool {
    event.conversation_id == authorized_conversation_id && !event.is_automated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_human_message_in_authorized_conversation() {
        let event = InboundEvent::from_user("C1", "U1", "echo hello");
        assert!(should_process(&event, "C1"));
    }

    #[test]
    fn rejects_other_conversations() {
        let event = InboundEvent::from_user("C2", "U1", "echo hello");
        assert!(!should_process(&event, "C1"));
    }

    #[test]
    fn rejects_automated_messages_even_in_authorized_conversation() {
        let mut event = InboundEvent::from_user("C1", "U1", "echo hello");
        event.is_automated = true;
        assert!(!should_process(&event, "C1"));
    }

    #[test]
    fn accepts_empty_text() {
        let event = InboundEvent::from_user("C1", "U1", "");
        assert!(should_process(&event, "C1"));
    }
}
