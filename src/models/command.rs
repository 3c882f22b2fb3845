//! # Command Model
//!
//! The protocol-neutral request every adapter produces: a command name, its parameters
//! and an optional payload whose length was declared on the wire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::params;

/// A decoded request addressed to a registered handler
///
/// Parameters are kept in a `BTreeMap` so that iteration (and therefore encoding) is
/// deterministic; the protocol itself attaches no meaning to parameter order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub params: BTreeMap<String, String>,
    pub payload: Option<Vec<u8>>,
    /// Byte count announced on the command line; equals `payload.len()` once fully read
    pub declared_length: usize,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style parameter setter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Attach a payload; an empty payload is treated as no payload at all
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        if payload.is_empty() {
            self.payload = None;
            self.declared_length = 0;
        } else {
            self.declared_length = payload.len();
            self.payload = Some(payload);
        }
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Pool requested through the `pool` parameter, if any
    pub fn requested_pool(&self) -> Option<&str> {
        self.param(params::POOL)
    }

    /// Caller-supplied correlation id (`requestID` parameter), if any
    pub fn request_id(&self) -> Option<&str> {
        self.param(params::REQUEST_ID)
    }

    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Parameters other than the given names, for handlers that forward the rest
    pub fn params_without(&self, excluded: &[&str]) -> BTreeMap<String, String> {
        self.params
            .iter()
            .filter(|(k, _)| !excluded.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_sets_declared_length() {
        let command = Command::new("echo").with_payload(b"hello".to_vec());
        assert_eq!(command.declared_length, 5);
        assert_eq!(command.payload_bytes(), b"hello");

        let empty = Command::new("echo").with_payload(Vec::new());
        assert_eq!(empty.declared_length, 0);
        assert!(empty.payload.is_none());
    }

    #[test]
    fn test_well_known_params() {
        let command = Command::new("add")
            .with_param("pool", "math")
            .with_param("requestID", "r-1")
            .with_param("num1", "2");

        assert_eq!(command.requested_pool(), Some("math"));
        assert_eq!(command.request_id(), Some("r-1"));

        let rest = command.params_without(&["pool", "requestID"]);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest.get("num1").map(String::as_str), Some("2"));
    }
}
