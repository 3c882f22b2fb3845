use proptest::prelude::*;
use std::collections::BTreeMap;

use switchyard_core::models::Command;

/// Strategy for generating command names (must start alphanumeric)
pub fn command_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_.-]{0,15}"
}

/// Strategy for generating parameter names
pub fn param_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,11}"
}

/// Strategy for generating parameter values (may be empty, never contain delimiters)
pub fn param_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.:/-]{0,16}"
}

/// Strategy for generating payloads, including empty ones
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating encodable commands
pub fn command_strategy() -> impl Strategy<Value = Command> {
    (
        command_name_strategy(),
        prop::collection::btree_map(param_name_strategy(), param_value_strategy(), 0..6),
        payload_strategy(),
    )
        .prop_map(|(name, params, payload): (String, BTreeMap<String, String>, Vec<u8>)| {
            params
                .into_iter()
                .fold(Command::new(name), |command, (k, v)| command.with_param(k, v))
                .with_payload(payload)
        })
}
