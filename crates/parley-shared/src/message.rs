//! The message model and its delivery lifecycle.
//!
//! A [`Message`] is append-only apart from its lifecycle fields: `status`,
//! `delivered_time` and `read_time` advance through the transition graph in
//! [`MessageStatus::can_transition_to`] and nothing else about a stored
//! message ever changes. Recall flips the status to [`MessageStatus::Recalled`]
//! and leaves the row in place; per-user "delete for me" is a separate
//! visibility record in the store, never a row deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Conversation, MessageId, UserId};

/// Payload kind carried by a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Video,
    File,
    Location,
    System,
    Custom,
}

/// Delivery lifecycle of a message.
///
/// `Sending -> Sent -> Delivered -> Read`, with `Recalled` reachable from any
/// of the three post-persist states inside the recall window, and `Failed`
/// reachable only from `Sending` when persistence is refused. `Recalled` and
/// `Failed` are terminal.
///
/// For group messages the status field is sender-facing only: `Delivered`
/// means at least one member connection took the push, and per-member read
/// state lives exclusively in [`ReadReceipt`] rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Recalled,
    Failed,
}

impl MessageStatus {
    /// Whether the transition graph permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Sending, Sent)
                | (Sending, Failed)
                | (Sent, Delivered)
                | (Sent, Recalled)
                | (Delivered, Read)
                | (Delivered, Recalled)
                | (Read, Recalled)
        )
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Recalled | MessageStatus::Failed)
    }
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Recalled => "recalled",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "recalled" => Ok(MessageStatus::Recalled),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Voice => "voice",
            MessageType::Video => "video",
            MessageType::File => "file",
            MessageType::Location => "location",
            MessageType::System => "system",
            MessageType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "voice" => Ok(MessageType::Voice),
            "video" => Ok(MessageType::Video),
            "file" => Ok(MessageType::File),
            "location" => Ok(MessageType::Location),
            "system" => Ok(MessageType::System),
            "custom" => Ok(MessageType::Custom),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// A chat message, private or group, addressed via [`Conversation`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub conversation: Conversation,
    pub message_type: MessageType,
    pub content: String,
    /// Message this one replies to, if any. Not carried over by forwarding.
    pub reply_to: Option<MessageId>,
    pub status: MessageStatus,
    pub send_time: DateTime<Utc>,
    pub delivered_time: Option<DateTime<Utc>>,
    pub read_time: Option<DateTime<Utc>>,
    /// Opaque client-defined extension payload (JSON string).
    pub extended_data: Option<String>,
}

impl Message {
    /// Build a fresh message in the `Sending` state, id assigned here.
    pub fn new(
        sender: UserId,
        conversation: Conversation,
        message_type: MessageType,
        content: String,
        reply_to: Option<MessageId>,
        extended_data: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            conversation,
            message_type,
            content,
            reply_to,
            status: MessageStatus::Sending,
            send_time: Utc::now(),
            delivered_time: None,
            read_time: None,
            extended_data,
        }
    }

    /// Replace the content with an empty string when the message has been
    /// recalled. Content is retained at rest; it is scrubbed on every egress
    /// path (events, history pages, offline sync).
    pub fn scrub_if_recalled(mut self) -> Self {
        if self.status == MessageStatus::Recalled {
            self.content.clear();
            self.extended_data = None;
        }
        self
    }
}

/// Per-(message, reader) acknowledgement for group conversations.
///
/// Creation is idempotent: a duplicate read is a no-op, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub reader: UserId,
    pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupId;

    #[test]
    fn transition_graph_moves_forward_only() {
        use MessageStatus::*;

        assert!(Sending.can_transition_to(Sent));
        assert!(Sending.can_transition_to(Failed));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));

        // Recall is reachable from every post-persist state.
        assert!(Sent.can_transition_to(Recalled));
        assert!(Delivered.can_transition_to(Recalled));
        assert!(Read.can_transition_to(Recalled));

        // No skipping a legal predecessor, no going backwards.
        assert!(!Sending.can_transition_to(Delivered));
        assert!(!Sending.can_transition_to(Read));
        assert!(!Sent.can_transition_to(Read));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Read.can_transition_to(Delivered));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        use MessageStatus::*;
        for next in [Sending, Sent, Delivered, Read, Recalled, Failed] {
            assert!(!Recalled.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Recalled.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Delivered.is_terminal());
    }

    #[test]
    fn scrub_clears_recalled_content_only() {
        let mut msg = Message::new(
            UserId::new(),
            Conversation::Group { group: GroupId::new() },
            MessageType::Text,
            "hello".into(),
            None,
            Some("{\"x\":1}".into()),
        );
        msg.status = MessageStatus::Delivered;
        let kept = msg.clone().scrub_if_recalled();
        assert_eq!(kept.content, "hello");

        msg.status = MessageStatus::Recalled;
        let scrubbed = msg.scrub_if_recalled();
        assert!(scrubbed.content.is_empty());
        assert!(scrubbed.extended_data.is_none());
    }
}
