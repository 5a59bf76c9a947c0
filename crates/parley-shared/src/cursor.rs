//! Keyset pagination cursor for history queries.
//!
//! A page token is an opaque reference to the `(send_time, id)` pair of the
//! oldest message the client has already seen. It has no storage of its own:
//! the server computes it from the last row of a page and the client hands it
//! back verbatim on the next request.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::MessageId;

/// Position of the oldest message already seen, in `(send_time, id)` order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub send_time: DateTime<Utc>,
    pub id: MessageId,
}

impl Cursor {
    pub fn new(send_time: DateTime<Utc>, id: MessageId) -> Self {
        Self { send_time, id }
    }

    /// Encode into the opaque token handed to clients.
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.send_time.to_rfc3339(), self.id.0);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Decode a client-supplied token. A malformed token is a validation
    /// failure, not a server fault.
    pub fn decode(token: &str) -> Result<Self, ProtocolError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| ProtocolError::InvalidPageToken)?;
        let raw = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidPageToken)?;

        let (ts, id) = raw.split_once('|').ok_or(ProtocolError::InvalidPageToken)?;
        let send_time = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| ProtocolError::InvalidPageToken)?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| ProtocolError::InvalidPageToken)?;

        Ok(Self { send_time, id: MessageId(id) })
    }
}
