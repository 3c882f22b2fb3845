//! # Command Protocol Codec
//!
//! Line-oriented wire format shared by every command-protocol transport:
//!
//! ```text
//! [delim]command[delim]name1[=value1][delim]...[delim][dataLength]\n
//! <dataLength bytes of payload>
//! ```
//!
//! Responses are `<message-or-status>[ <dataLength>]\n` followed by the data bytes.
//!
//! Parsing has two read modes. [`ReadMode::Framed`] treats any truncation as a parse
//! error, which suits a reader sitting directly on a stream. [`ReadMode::Replayable`]
//! reports truncation as [`Decoded::Incomplete`] so the caller can buffer more bytes and
//! parse again from the start of the buffer.

pub mod command_codec;
pub mod frame;
pub mod response;

pub use command_codec::{CommandCodec, Decoded, ReadMode};
pub use frame::{CommandFrameCodec, ResponseFrameCodec};
pub use response::{decode_response, encode_response, write_response, ResponseFrame};

use thiserror::Error;

/// Errors raised while reading or writing the command protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid syntax in command: {0}")]
    Malformed(String),

    #[error("Maximum command line size allowed: {limit}")]
    LineTooLong { limit: usize },

    #[error("Truncated input: {0}")]
    Truncated(String),

    #[error("Command cannot be encoded: {0}")]
    Unencodable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CodecError {
    /// Whether the error means the inbound bytes could not be parsed
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::LineTooLong { .. } | Self::Truncated(_)
        )
    }
}

impl From<std::io::Error> for CodecError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
