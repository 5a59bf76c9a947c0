use thiserror::Error;

/// Errors that can arise while decoding client input at the protocol edge.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The history page token could not be decoded.
    #[error("Invalid page token")]
    InvalidPageToken,

    /// The frame was not valid JSON for any known command.
    #[error("Malformed command: {0}")]
    MalformedCommand(String),
}
