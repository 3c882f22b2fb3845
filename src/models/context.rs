use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Correlation token carried from the caller to the handler and back
///
/// The engine only reads `request_id` (to scope the request cache); attributes are
/// propagated untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl RequestContext {
    /// New context with a generated request id
    pub fn new() -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_attributes_do_not_leak_between_clones() {
        let base = RequestContext::with_request_id("req-1").with_attribute("trace", "abc");
        let derived = base.clone().with_attribute("span", "def");

        assert_eq!(base.attribute("span"), None);
        assert_eq!(derived.attribute("trace"), Some("abc"));
        assert_eq!(derived.request_id, "req-1");
    }

    #[test]
    fn test_serializes_with_attributes() {
        let context = RequestContext::with_request_id("req-7").with_attribute("tenant", "acme");
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["request_id"], "req-7");
        assert_eq!(json["attributes"]["tenant"], "acme");

        let parsed: RequestContext =
            serde_json::from_str(r#"{"request_id":"req-8"}"#).unwrap();
        assert_eq!(parsed, RequestContext::with_request_id("req-8"));
    }
}
