//! # parley-shared
//!
//! Domain types and wire protocol for the Parley chat backend.
//!
//! Everything that both the store and the realtime server need to agree on
//! lives here: identifier newtypes, the message model with its delivery
//! lifecycle, the keyset pagination cursor, and the websocket protocol
//! exchanged with clients.

pub mod constants;
pub mod cursor;
pub mod message;
pub mod protocol;
pub mod types;

mod error;

pub use cursor::Cursor;
pub use error::ProtocolError;
pub use message::{Message, MessageStatus, MessageType, ReadReceipt};
pub use types::{Conversation, ConnectionId, GroupId, MessageId, UserId};
