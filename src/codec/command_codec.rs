use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::CodecError;
use crate::constants::protocol::{
    CARRIAGE_RETURN, DEFAULT_DELIMITER, DEFAULT_PARAM_VALUE, LINE_FEED, MAX_COMMAND_INPUT,
    PARAM_VALUE_SEPARATOR,
};
use crate::models::Command;

/// How truncated input is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Truncation is a fatal [`CodecError::Truncated`]
    Framed,
    /// Truncation yields [`Decoded::Incomplete`]; nothing is consumed
    Replayable,
}

/// Outcome of a decode attempt over a byte buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A full command, and how many bytes of the buffer it occupied
    Complete { command: Command, consumed: usize },
    /// More bytes are needed; retry from the start of the buffer once they arrive
    Incomplete { reason: String },
}

/// Parser and encoder for command lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandCodec {
    max_line_size: usize,
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(MAX_COMMAND_INPUT)
    }
}

impl CommandCodec {
    pub fn new(max_line_size: usize) -> Self {
        Self { max_line_size }
    }

    pub fn max_line_size(&self) -> usize {
        self.max_line_size
    }

    /// Decode one command from the front of `buf`
    pub fn decode(&self, buf: &[u8], mode: ReadMode) -> Result<Decoded, CodecError> {
        let window = &buf[..buf.len().min(self.max_line_size)];
        let Some(line_end) = window.iter().position(|b| *b == LINE_FEED) else {
            if buf.len() >= self.max_line_size {
                return Err(CodecError::LineTooLong {
                    limit: self.max_line_size,
                });
            }
            return Self::truncated(
                mode,
                format!(
                    "Stream ended before encountering a \\n after {} bytes",
                    buf.len()
                ),
            );
        };

        let mut line = &buf[..line_end];
        if line.last() == Some(&CARRIAGE_RETURN) {
            line = &line[..line.len() - 1];
        }

        let (name, params, declared_length) = Self::parse_line(line)?;

        let data_start = line_end + 1;
        let available = buf.len() - data_start;
        if available < declared_length {
            return Self::truncated(
                mode,
                format!(
                    "Stream ended before all data was read for command '{name}'. Data bytes needed: {}",
                    declared_length - available
                ),
            );
        }

        let payload = (declared_length > 0)
            .then(|| buf[data_start..data_start + declared_length].to_vec());

        Ok(Decoded::Complete {
            command: Command {
                name,
                params,
                payload,
                declared_length,
            },
            consumed: data_start + declared_length,
        })
    }

    /// Read exactly one command off a stream, treating any truncation as fatal
    ///
    /// Bytes that arrive after the command's payload are discarded, so this suits
    /// one-command-per-connection transports; persistent connections should use
    /// [`super::CommandFrameCodec`].
    pub async fn read_command<R>(&self, reader: &mut R) -> Result<Command, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 4096];
        loop {
            match self.decode(&buf, ReadMode::Replayable)? {
                Decoded::Complete { command, consumed } => {
                    if consumed < buf.len() {
                        debug!(
                            command = %command.name,
                            discarded = buf.len() - consumed,
                            "Discarding bytes read past the end of the command"
                        );
                    }
                    return Ok(command);
                }
                Decoded::Incomplete { reason } => {
                    let read = reader.read(&mut chunk).await?;
                    if read == 0 {
                        return Err(CodecError::Truncated(reason));
                    }
                    buf.extend_from_slice(&chunk[..read]);
                }
            }
        }
    }

    /// Encode a command in canonical form: no leading delimiter, parameters in key order,
    /// every parameter written as `name=value`, length only when a payload is present.
    pub fn encode_command(&self, command: &Command) -> Result<Vec<u8>, CodecError> {
        Self::check_token(&command.name, "command name", false)?;
        if !command
            .name
            .as_bytes()
            .first()
            .is_some_and(u8::is_ascii_alphanumeric)
        {
            return Err(CodecError::Unencodable(format!(
                "command name '{}' must start with an ASCII letter or digit",
                command.name
            )));
        }
        let payload = command.payload_bytes();
        let mut out = Vec::with_capacity(command.name.len() + 32 + payload.len());
        out.extend_from_slice(command.name.as_bytes());

        for (name, value) in &command.params {
            Self::check_token(name, "parameter name", false)?;
            Self::check_token(value, "parameter value", true)?;
            if name.as_bytes().contains(&PARAM_VALUE_SEPARATOR) {
                return Err(CodecError::Unencodable(format!(
                    "parameter name '{name}' contains '='"
                )));
            }
            out.push(DEFAULT_DELIMITER);
            out.extend_from_slice(name.as_bytes());
            out.push(PARAM_VALUE_SEPARATOR);
            out.extend_from_slice(value.as_bytes());
        }

        if !payload.is_empty() {
            out.push(DEFAULT_DELIMITER);
            out.extend_from_slice(payload.len().to_string().as_bytes());
        }
        out.push(LINE_FEED);
        out.extend_from_slice(payload);

        if out.len() - payload.len() > self.max_line_size {
            return Err(CodecError::LineTooLong {
                limit: self.max_line_size,
            });
        }
        Ok(out)
    }

    fn truncated(mode: ReadMode, reason: String) -> Result<Decoded, CodecError> {
        match mode {
            ReadMode::Framed => Err(CodecError::Truncated(reason)),
            ReadMode::Replayable => Ok(Decoded::Incomplete { reason }),
        }
    }

    fn check_token(token: &str, what: &str, allow_empty: bool) -> Result<(), CodecError> {
        if token.is_empty() && !allow_empty {
            return Err(CodecError::Unencodable(format!("{what} is empty")));
        }
        if token
            .bytes()
            .any(|b| b == DEFAULT_DELIMITER || b == LINE_FEED || b == CARRIAGE_RETURN)
        {
            return Err(CodecError::Unencodable(format!(
                "{what} '{token}' contains a delimiter or line break"
            )));
        }
        Ok(())
    }

    fn parse_line(line: &[u8]) -> Result<(String, BTreeMap<String, String>, usize), CodecError> {
        let (delimiter, body) = match line.first() {
            Some(first) if !first.is_ascii_alphanumeric() => (*first, &line[1..]),
            _ => (DEFAULT_DELIMITER, line),
        };

        let mut tokens = body
            .split(|b| *b == delimiter)
            .filter(|token| !token.is_empty())
            .peekable();

        let name = match tokens.next() {
            Some(token) => utf8(token, "command name")?,
            None => {
                return Err(CodecError::Malformed(format!(
                    "missing command name in '{}'",
                    String::from_utf8_lossy(line)
                )))
            }
        };

        let mut params = BTreeMap::new();
        let mut declared_length = 0usize;

        while let Some(token) = tokens.next() {
            if token.iter().all(u8::is_ascii_digit) {
                if tokens.peek().is_some() {
                    return Err(CodecError::Malformed(format!(
                        "data length must be the last token in '{}'",
                        String::from_utf8_lossy(line)
                    )));
                }
                let digits = utf8(token, "data length")?;
                declared_length = digits.parse::<usize>().map_err(|e| {
                    CodecError::Malformed(format!("invalid data length '{digits}': {e}"))
                })?;
                break;
            }

            let (param_name, value) = match token.iter().position(|b| *b == PARAM_VALUE_SEPARATOR)
            {
                Some(split) => (
                    utf8(&token[..split], "parameter name")?,
                    utf8(&token[split + 1..], "parameter value")?,
                ),
                None => (
                    utf8(token, "parameter name")?,
                    DEFAULT_PARAM_VALUE.to_string(),
                ),
            };
            if param_name.is_empty() {
                return Err(CodecError::Malformed(format!(
                    "empty parameter name in '{}'",
                    String::from_utf8_lossy(line)
                )));
            }
            params.insert(param_name, value);
        }

        Ok((name, params, declared_length))
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| CodecError::Malformed(format!("{what} is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(decoded: Decoded) -> (Command, usize) {
        match decoded {
            Decoded::Complete { command, consumed } => (command, consumed),
            Decoded::Incomplete { reason } => panic!("expected complete command, got: {reason}"),
        }
    }

    #[test]
    fn test_leading_space_is_delimiter() {
        let codec = CommandCodec::default();
        let (command, consumed) =
            complete(codec.decode(b" ping count=3\n", ReadMode::Framed).unwrap());

        assert_eq!(command.name, "ping");
        assert_eq!(command.param("count"), Some("3"));
        assert!(command.payload.is_none());
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_custom_delimiter() {
        let codec = CommandCodec::default();
        let (command, _) =
            complete(codec.decode(b"|get|key=a b|verbose\n", ReadMode::Framed).unwrap());

        assert_eq!(command.name, "get");
        assert_eq!(command.param("key"), Some("a b"));
        assert_eq!(command.param("verbose"), Some("true"));
    }

    #[test]
    fn test_value_split_on_first_equals() {
        let codec = CommandCodec::default();
        let (command, _) = complete(codec.decode(b"set expr=a=b\n", ReadMode::Framed).unwrap());
        assert_eq!(command.param("expr"), Some("a=b"));
    }

    #[test]
    fn test_carriage_return_stripped() {
        let codec = CommandCodec::default();
        let (command, _) = complete(codec.decode(b"stats verbose\r\n", ReadMode::Framed).unwrap());
        assert_eq!(command.name, "stats");
        assert_eq!(command.param("verbose"), Some("true"));
    }

    #[test]
    fn test_payload_read() {
        let codec = CommandCodec::default();
        let input = b"put key=x 5\nhelloEXTRA";
        let (command, consumed) = complete(codec.decode(input, ReadMode::Framed).unwrap());

        assert_eq!(command.payload.as_deref(), Some(&b"hello"[..]));
        assert_eq!(command.declared_length, 5);
        assert_eq!(consumed, 17);
    }

    #[test]
    fn test_truncated_payload_by_mode() {
        let codec = CommandCodec::default();
        let input = b"put 5\nhel";

        assert!(matches!(
            codec.decode(input, ReadMode::Replayable),
            Ok(Decoded::Incomplete { .. })
        ));
        assert!(matches!(
            codec.decode(input, ReadMode::Framed),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_missing_line_feed_by_mode() {
        let codec = CommandCodec::default();
        assert!(matches!(
            codec.decode(b"ping", ReadMode::Replayable),
            Ok(Decoded::Incomplete { .. })
        ));
        assert!(matches!(
            codec.decode(b"", ReadMode::Replayable),
            Ok(Decoded::Incomplete { .. })
        ));
        assert!(matches!(
            codec.decode(b"ping", ReadMode::Framed),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_oversized_line_fails_in_both_modes() {
        let codec = CommandCodec::new(16);
        let input = vec![b'a'; 16];

        for mode in [ReadMode::Framed, ReadMode::Replayable] {
            assert_eq!(
                codec.decode(&input, mode),
                Err(CodecError::LineTooLong { limit: 16 })
            );
        }
    }

    #[test]
    fn test_length_must_be_last() {
        let codec = CommandCodec::default();
        let err = codec.decode(b"put 5 key=x\n", ReadMode::Framed).unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_empty_line_rejected() {
        let codec = CommandCodec::default();
        assert!(matches!(
            codec.decode(b"\n", ReadMode::Framed),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode(b"   \n", ReadMode::Framed),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_canonical_encoding() {
        let codec = CommandCodec::default();
        let command = Command::new("put")
            .with_param("zeta", "1")
            .with_param("alpha", "true")
            .with_payload(b"abc".to_vec());

        let bytes = codec.encode_command(&command).unwrap();
        assert_eq!(bytes, b"put alpha=true zeta=1 3\nabc");
    }

    #[test]
    fn test_encoding_rejects_delimiters() {
        let codec = CommandCodec::default();
        let command = Command::new("put").with_param("key", "has space");
        assert!(matches!(
            codec.encode_command(&command),
            Err(CodecError::Unencodable(_))
        ));
        assert!(codec.encode_command(&Command::new("")).is_err());
        assert!(codec.encode_command(&Command::new("-dash")).is_err());
    }

    #[tokio::test]
    async fn test_read_command_from_stream() {
        let codec = CommandCodec::default();
        let mut reader = tokio_test::io::Builder::new()
            .read(b"put key=x ")
            .read(b"4\nda")
            .read(b"ta")
            .build();

        let command = codec.read_command(&mut reader).await.unwrap();
        assert_eq!(command.name, "put");
        assert_eq!(command.payload_bytes(), b"data");
    }

    #[tokio::test]
    async fn test_read_command_stream_ends_early() {
        let codec = CommandCodec::default();
        let mut reader = tokio_test::io::Builder::new().read(b"put 10\nshort").build();

        let err = codec.read_command(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }
}
