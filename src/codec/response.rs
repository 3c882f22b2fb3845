use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::CodecError;
use crate::constants::protocol::{CARRIAGE_RETURN, DEFAULT_DELIMITER, LINE_FEED};
use crate::models::ProxyResult;

/// A response as seen by a command-protocol client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// `SUCCESS`, `ERROR` or the handler's message
    pub status: String,
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    pub fn is_error(&self) -> bool {
        self.status == crate::constants::protocol::ERROR
    }
}

/// Append the wire form of `result` to `out`
///
/// Line breaks inside a handler message would corrupt framing, so they are written as
/// spaces.
pub fn encode_result(result: &ProxyResult, out: &mut Vec<u8>) {
    let length = result.length();
    out.extend(result.status_line().bytes().map(|b| match b {
        LINE_FEED | CARRIAGE_RETURN => DEFAULT_DELIMITER,
        other => other,
    }));
    if length > 0 {
        out.push(DEFAULT_DELIMITER);
        out.extend_from_slice(length.to_string().as_bytes());
    }
    out.push(LINE_FEED);
    out.extend_from_slice(&result.data_bytes());
}

/// Wire bytes for an optional result; `None` encodes to nothing
pub fn encode_response(result: Option<&ProxyResult>) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(result) = result {
        encode_result(result, &mut out);
    }
    out
}

pub async fn write_response<W>(writer: &mut W, result: Option<&ProxyResult>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_response(result);
    if bytes.is_empty() {
        return Ok(());
    }
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Decode a response from the front of `buf`
///
/// Returns `Ok(None)` until the status line and all announced bytes are buffered.
/// The protocol cannot distinguish a message whose last word is a number from a
/// length, so a trailing all-digit word is always read as the data length.
pub fn decode_response(
    buf: &[u8],
    max_line_size: usize,
) -> Result<Option<(ResponseFrame, usize)>, CodecError> {
    let window = &buf[..buf.len().min(max_line_size)];
    let Some(line_end) = window.iter().position(|b| *b == LINE_FEED) else {
        if buf.len() >= max_line_size {
            return Err(CodecError::LineTooLong {
                limit: max_line_size,
            });
        }
        return Ok(None);
    };

    let mut line = &buf[..line_end];
    if line.last() == Some(&CARRIAGE_RETURN) {
        line = &line[..line.len() - 1];
    }
    let line = String::from_utf8_lossy(line);

    let (status, length) = match line.rsplit_once(char::from(DEFAULT_DELIMITER)) {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
            let length = tail.parse::<usize>().map_err(|e| {
                CodecError::Malformed(format!("invalid response length '{tail}': {e}"))
            })?;
            (head.to_string(), length)
        }
        _ => (line.to_string(), 0),
    };

    let data_start = line_end + 1;
    if buf.len() - data_start < length {
        return Ok(None);
    }

    Ok(Some((
        ResponseFrame {
            status,
            payload: buf[data_start..data_start + length].to_vec(),
        },
        data_start + length,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_without_data() {
        let result = ProxyResult::success().with_message("pong");
        assert_eq!(encode_response(Some(&result)), b"pong\n");
    }

    #[test]
    fn test_status_words() {
        assert_eq!(encode_response(Some(&ProxyResult::success())), b"SUCCESS\n");
        let failed = ProxyResult {
            success: false,
            message: None,
            data: None,
            metadata: None,
        };
        assert_eq!(encode_response(Some(&failed)), b"ERROR\n");
    }

    #[test]
    fn test_data_and_metadata() {
        let result = ProxyResult::success()
            .with_data(b"abc".to_vec())
            .with_metadata(b"!".to_vec());
        assert_eq!(encode_response(Some(&result)), b"SUCCESS 4\nabc!");
    }

    #[test]
    fn test_chunks_concatenated() {
        let result = ProxyResult::success()
            .with_message("rows")
            .with_chunks(vec![b"a".to_vec(), b"bc".to_vec()]);
        assert_eq!(encode_response(Some(&result)), b"rows 3\nabc");
    }

    #[test]
    fn test_none_writes_nothing() {
        assert!(encode_response(None).is_empty());
    }

    #[test]
    fn test_line_breaks_in_message_flattened() {
        let result = ProxyResult::failure("line one\nline two");
        assert_eq!(encode_response(Some(&result)), b"line one line two\n");
    }

    #[test]
    fn test_decode_response() {
        let (frame, consumed) = decode_response(b"SUCCESS 3\nabcNEXT", 1024)
            .unwrap()
            .unwrap();
        assert_eq!(frame.status, "SUCCESS");
        assert_eq!(frame.payload, b"abc");
        assert_eq!(consumed, 13);

        let (frame, _) = decode_response(b"Connection refused\n", 1024)
            .unwrap()
            .unwrap();
        assert_eq!(frame.status, "Connection refused");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_decode_response_waits_for_payload() {
        assert_eq!(decode_response(b"SUCCESS 10\nabc", 1024).unwrap(), None);
        assert_eq!(decode_response(b"SUCC", 1024).unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_response() {
        let mut writer = tokio_test::io::Builder::new().write(b"pong\n").build();
        let result = ProxyResult::success().with_message("pong");
        write_response(&mut writer, Some(&result)).await.unwrap();
    }
}
