//! Property tests for the command codec

mod common;

use proptest::prelude::*;

use common::strategies::{command_strategy, payload_strategy};
use switchyard_core::codec::{encode_response, CodecError, CommandCodec, Decoded, ReadMode};
use switchyard_core::models::{Command, ProxyResult};

fn decode_complete(codec: &CommandCodec, bytes: &[u8]) -> (Command, usize) {
    match codec.decode(bytes, ReadMode::Framed) {
        Ok(Decoded::Complete { command, consumed }) => (command, consumed),
        other => panic!("expected a complete command, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(command in command_strategy()) {
        let codec = CommandCodec::default();
        let encoded = codec.encode_command(&command).unwrap();

        let (decoded, consumed) = decode_complete(&codec, &encoded);
        prop_assert_eq!(consumed, encoded.len());
        prop_assert_eq!(decoded, command);
    }

    #[test]
    fn prop_canonical_bytes_survive_reencoding(command in command_strategy()) {
        let codec = CommandCodec::default();
        let bytes = codec.encode_command(&command).unwrap();

        let (decoded, _) = decode_complete(&codec, &bytes);
        prop_assert_eq!(codec.encode_command(&decoded).unwrap(), bytes);
    }

    #[test]
    fn prop_truncated_input_is_retry_signal_when_replayable(
        command in command_strategy(),
        cut in 1usize..64,
    ) {
        let codec = CommandCodec::default();
        let encoded = codec.encode_command(&command).unwrap();
        let prefix = &encoded[..encoded.len().saturating_sub(cut)];

        let replayable = codec.decode(prefix, ReadMode::Replayable);
        prop_assert!(
            matches!(replayable, Ok(Decoded::Incomplete { .. })),
            "replayable decode of prefix returned {:?}",
            replayable
        );

        let framed = codec.decode(prefix, ReadMode::Framed);
        prop_assert!(
            matches!(framed, Err(CodecError::Truncated(_))),
            "framed decode of prefix returned {:?}",
            framed
        );
    }

    #[test]
    fn prop_trailing_bytes_are_not_consumed(
        command in command_strategy(),
        trailing in payload_strategy(),
    ) {
        let codec = CommandCodec::default();
        let mut bytes = codec.encode_command(&command).unwrap();
        let command_len = bytes.len();
        bytes.extend_from_slice(&trailing);

        let (decoded, consumed) = decode_complete(&codec, &bytes);
        prop_assert_eq!(consumed, command_len);
        prop_assert_eq!(decoded, command);
    }

    #[test]
    fn prop_result_length_counts_data_and_metadata(
        data in payload_strategy(),
        metadata in payload_strategy(),
    ) {
        let result = ProxyResult::success()
            .with_data(data.clone())
            .with_metadata(metadata.clone());
        prop_assert_eq!(result.length(), data.len() + metadata.len());

        let encoded = encode_response(Some(&result));
        prop_assert!(encoded.ends_with(&[data.as_slice(), metadata.as_slice()].concat()));
    }
}

#[test]
fn test_ping_example_decodes_with_leading_delimiter() {
    let codec = CommandCodec::default();
    let (command, consumed) = decode_complete(&codec, b" ping count=3\n");

    assert_eq!(command.name, "ping");
    assert_eq!(command.param("count"), Some("3"));
    assert!(command.payload.is_none());
    assert_eq!(consumed, 14);
}

#[test]
fn test_pong_result_encodes_to_single_line() {
    let result = ProxyResult::success().with_message("pong");
    assert_eq!(encode_response(Some(&result)), b"pong\n");
}
