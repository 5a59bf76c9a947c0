//! Websocket wire protocol between clients and the realtime hub.
//!
//! Inbound frames decode to a [`ClientCommand`]; everything pushed back is a
//! [`ServerEvent`]. Both are JSON with an externally visible `kind` tag so
//! that clients can dispatch without peeking into payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageStatus, MessageType};
use crate::types::{ConnectionId, Conversation, GroupId, MessageId, UserId};

/// All operations a client may submit over an open connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientCommand {
    /// First frame on every connection: binds the session identity.
    Hello(HelloRequest),

    /// Send a message to a single peer.
    SendPrivate(SendPrivateRequest),

    /// Send a message to a group roster.
    SendGroup(SendGroupRequest),

    /// Acknowledge specific messages as read.
    MarkRead(MarkReadRequest),

    /// Acknowledge every unread message in one conversation.
    MarkConversationRead(MarkConversationReadRequest),

    /// Retract a previously sent message (recall window permitting).
    Recall(RecallRequest),

    /// Copy an existing message into another conversation.
    Forward(ForwardRequest),

    /// Hide a message from this user's own history.
    Hide(HideRequest),

    /// Page through conversation history.
    GetHistory(HistoryRequest),

    /// Query unread counters.
    GetUnreadCounts(UnreadCountsRequest),

    /// Broadcast a typing indicator to the conversation.
    Typing(TypingRequest),

    /// Liveness probe.
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloRequest {
    /// Authenticated user id supplied by the session provider. The core
    /// trusts this value and does not re-verify credentials.
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendPrivateRequest {
    pub to: UserId,
    pub message_type: MessageType,
    pub content: String,
    pub reply_to: Option<MessageId>,
    /// Client-side correlation id echoed back in status updates.
    pub client_ref: Option<String>,
    pub extended_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendGroupRequest {
    pub group: GroupId,
    pub message_type: MessageType,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub client_ref: Option<String>,
    pub extended_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkReadRequest {
    pub conversation: Conversation,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkConversationReadRequest {
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecallRequest {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwardRequest {
    pub message_id: MessageId,
    pub to: Conversation,
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HideRequest {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRequest {
    pub conversation: Conversation,
    /// Token from the previous page, absent for the newest page.
    pub page_token: Option<String>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnreadCountsRequest {
    /// Scope the count to one conversation; absent means the user total.
    pub conversation: Option<Conversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingRequest {
    pub conversation: Conversation,
}

/// All events the hub pushes to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement, first event on every connection.
    Connected(ConnectedEvent),

    /// A new message addressed to this user.
    MessageReceived(MessageReceivedEvent),

    /// A lifecycle transition on a message this user sent.
    StatusUpdated(StatusUpdatedEvent),

    /// Another participant acknowledged messages as read.
    MessagesRead(MessagesReadEvent),

    /// A message in one of this user's conversations was recalled.
    MessageRecalled(MessageRecalledEvent),

    /// Someone is typing in a shared conversation.
    Typing(TypingEvent),

    /// Reply to [`ClientCommand::GetHistory`].
    HistoryPage(HistoryPageEvent),

    /// Reply to [`ClientCommand::GetUnreadCounts`].
    UnreadCounts(UnreadCountsEvent),

    /// Reply to [`ClientCommand::Ping`].
    Pong(PongEvent),

    /// A rejected operation. Nothing is ever silently dropped.
    Error(ErrorEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectedEvent {
    pub connection_id: ConnectionId,
    pub server_time: DateTime<Utc>,
    pub protocol_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageReceivedEvent {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdatedEvent {
    pub message_id: MessageId,
    pub client_ref: Option<String>,
    pub status: MessageStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesReadEvent {
    pub reader: UserId,
    pub conversation: Conversation,
    pub message_ids: Vec<MessageId>,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecalledEvent {
    pub message_id: MessageId,
    pub conversation: Conversation,
    pub recalled_by: UserId,
    pub recalled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingEvent {
    pub user: UserId,
    pub conversation: Conversation,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPageEvent {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    /// Absent when the conversation is exhausted.
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnreadCountsEvent {
    pub conversation: Option<Conversation>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PongEvent {
    pub server_time: DateTime<Utc>,
}

/// Structured error taxonomy surfaced to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or invalid input; rejected before any state change.
    Validation,
    /// The referenced message or conversation does not exist.
    NotFound,
    /// Recall window exceeded, wrong actor, duplicate recall, lost race.
    PolicyViolation,
    /// The store refused the operation; safe to retry.
    Persistence,
    /// The frame itself could not be understood.
    Protocol,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
}

impl ClientCommand {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trip() {
        let cmd = ClientCommand::SendPrivate(SendPrivateRequest {
            to: UserId::new(),
            message_type: MessageType::Text,
            content: "hello there".into(),
            reply_to: None,
            client_ref: Some("local-42".into()),
            extended_data: None,
        });

        let json = cmd.to_json().unwrap();
        let back = ClientCommand::from_json(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn events_carry_a_kind_tag() {
        let event = ServerEvent::Pong(PongEvent { server_time: Utc::now() });
        let json = event.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "pong");
    }

    #[test]
    fn conversation_tag_is_closed() {
        let json = r#"{"kind":"typing","conversation":{"kind":"nearby"}}"#;
        assert!(ClientCommand::from_json(json).is_err());
    }
}
