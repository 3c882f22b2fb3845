//! `tokio_util` codecs so the command protocol can be driven through `Framed` streams.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::command_codec::{CommandCodec, Decoded, ReadMode};
use super::response::{decode_response, encode_result, ResponseFrame};
use super::CodecError;
use crate::models::{Command, ProxyResult};

/// Server-side codec: decodes commands, encodes results
///
/// Decoding runs the parser in replayable mode, so a partially received command is left
/// in the buffer untouched until the rest arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandFrameCodec {
    codec: CommandCodec,
}

impl CommandFrameCodec {
    pub fn new(codec: CommandCodec) -> Self {
        Self { codec }
    }
}

impl Decoder for CommandFrameCodec {
    type Item = Command;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.codec.decode(src, ReadMode::Replayable)? {
            Decoded::Complete { command, consumed } => {
                src.advance(consumed);
                Ok(Some(command))
            }
            Decoded::Incomplete { .. } => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        // Leftover bytes at end of stream are a truncated command.
        match self.codec.decode(src, ReadMode::Framed)? {
            Decoded::Complete { command, consumed } => {
                src.advance(consumed);
                Ok(Some(command))
            }
            Decoded::Incomplete { reason } => Err(CodecError::Truncated(reason)),
        }
    }
}

impl Encoder<ProxyResult> for CommandFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ProxyResult, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut out = Vec::with_capacity(64 + item.length());
        encode_result(&item, &mut out);
        dst.put_slice(&out);
        Ok(())
    }
}

/// Client-side codec: encodes commands, decodes responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseFrameCodec {
    codec: CommandCodec,
}

impl ResponseFrameCodec {
    pub fn new(codec: CommandCodec) -> Self {
        Self { codec }
    }
}

impl Decoder for ResponseFrameCodec {
    type Item = ResponseFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_response(src, self.codec.max_line_size())? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Command> for ResponseFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&self.codec.encode_command(&item)?);
        Ok(())
    }
}
