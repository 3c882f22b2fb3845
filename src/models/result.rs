//! # Result Model
//!
//! `ProxyResult` is what a handler hands back and what the codec writes to the wire.
//! Its `length()` is the number of payload bytes that follow the response status line.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{messages, protocol};

/// Payload carried by a [`ProxyResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultData {
    /// A single byte blob
    Bytes(Vec<u8>),
    /// A list of blobs written back to back, with an explicitly supplied total length
    Chunks { chunks: Vec<Vec<u8>>, length: usize },
}

impl ResultData {
    /// Chunked data whose length is the sum of its parts
    pub fn chunks(chunks: Vec<Vec<u8>>) -> Self {
        let length = chunks.iter().map(Vec::len).sum();
        Self::Chunks { chunks, length }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResult {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<ResultData>,
    pub metadata: Option<Vec<u8>>,
}

impl ProxyResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            metadata: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            metadata: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(ResultData::Bytes(data.into()));
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.data = Some(ResultData::chunks(chunks));
        self
    }

    /// Chunked data with a caller-declared length
    ///
    /// The declared length is what goes on the wire even when it disagrees with the chunks;
    /// a mismatch is logged because the client will mis-frame the response.
    pub fn with_chunks_of_length(mut self, chunks: Vec<Vec<u8>>, length: usize) -> Self {
        self.data = Some(ResultData::Chunks { chunks, length });
        if let Some((declared, actual)) = self.length_mismatch() {
            warn!(
                declared = declared,
                actual = actual,
                "Declared result length differs from the chunk bytes"
            );
        }
        self
    }

    /// `(declared, actual)` when chunked data declares a length other than its byte count
    pub fn length_mismatch(&self) -> Option<(usize, usize)> {
        match &self.data {
            Some(ResultData::Chunks { chunks, length }) => {
                let actual = chunks.iter().map(Vec::len).sum();
                (*length != actual).then_some((*length, actual))
            }
            _ => None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Successful result whose data is the JSON serialisation of `value`
    ///
    /// This is the generic serialisation path for results that are not raw bytes.
    pub fn serialized<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::success().with_data(serde_json::to_vec(value)?))
    }

    /// Result standing in for a handler that returned nothing
    pub fn no_result() -> Self {
        Self::success().with_message(messages::NO_RESULT)
    }

    /// Immediate answer for a command dispatched fire-and-forget
    pub fn async_queued() -> Self {
        Self::success().with_message(messages::ASYNC_QUEUED)
    }

    /// Number of bytes following the status line on the wire
    ///
    /// Single blobs count their metadata too; chunked data reports its declared length.
    pub fn length(&self) -> usize {
        match &self.data {
            Some(ResultData::Bytes(bytes)) => {
                bytes.len() + self.metadata.as_ref().map_or(0, Vec::len)
            }
            Some(ResultData::Chunks { length, .. }) => *length,
            None => 0,
        }
    }

    /// The status word or handler message written at the start of the response line
    pub fn status_line(&self) -> &str {
        match &self.message {
            Some(message) => message,
            None if self.success => protocol::SUCCESS,
            None => protocol::ERROR,
        }
    }

    /// Data bytes (and metadata for single blobs) in wire order
    pub fn data_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        match &self.data {
            Some(ResultData::Bytes(bytes)) => {
                out.extend_from_slice(bytes);
                if let Some(metadata) = &self.metadata {
                    out.extend_from_slice(metadata);
                }
            }
            Some(ResultData::Chunks { chunks, .. }) => {
                for chunk in chunks {
                    out.extend_from_slice(chunk);
                }
            }
            None => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_includes_metadata_for_blobs() {
        let result = ProxyResult::success()
            .with_data(b"abc".to_vec())
            .with_metadata(b"xy".to_vec());
        assert_eq!(result.length(), 5);
        assert_eq!(result.data_bytes(), b"abcxy");
    }

    #[test]
    fn test_chunk_length_is_explicit() {
        let result = ProxyResult::success().with_chunks(vec![b"ab".to_vec(), b"cde".to_vec()]);
        assert_eq!(result.length(), 5);

        let declared = ProxyResult::success().with_chunks_of_length(vec![b"ab".to_vec()], 7);
        assert_eq!(declared.length(), 7);
    }

    #[test]
    fn test_declared_length_mismatch_detected() {
        let short = ProxyResult::success().with_chunks_of_length(vec![b"ab".to_vec()], 7);
        assert_eq!(short.length_mismatch(), Some((7, 2)));

        let exact =
            ProxyResult::success().with_chunks_of_length(vec![b"ab".to_vec(), b"c".to_vec()], 3);
        assert_eq!(exact.length_mismatch(), None);
        assert_eq!(
            ProxyResult::success()
                .with_data(b"abc".to_vec())
                .length_mismatch(),
            None
        );
    }

    #[test]
    fn test_no_data_has_zero_length() {
        let result = ProxyResult::success().with_metadata(b"ignored".to_vec());
        assert_eq!(result.length(), 0);
        assert!(result.data_bytes().is_empty());
    }

    #[test]
    fn test_status_line() {
        assert_eq!(ProxyResult::success().status_line(), "SUCCESS");
        assert_eq!(
            ProxyResult {
                success: false,
                message: None,
                data: None,
                metadata: None
            }
            .status_line(),
            "ERROR"
        );
        assert_eq!(ProxyResult::failure("boom").status_line(), "boom");
    }

    #[test]
    fn test_serialized_result() {
        let result = ProxyResult::serialized(&serde_json::json!({"sum": 3})).unwrap();
        assert_eq!(result.data_bytes(), br#"{"sum":3}"#);
        assert_eq!(result.length(), 9);
    }
}
