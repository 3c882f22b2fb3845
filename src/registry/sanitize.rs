use tracing::debug;

/// Reduce an identifier to `[A-Za-z0-9_]` so it is safe as a pool, metric or dashboard key
///
/// Every other character, whitespace included, is dropped.
pub fn sanitize_identifier(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if sanitized != raw {
        debug!(
            original = %raw,
            sanitized = %sanitized,
            "Identifier sanitized for use as a pool or metric key"
        );
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_identifier_unchanged() {
        assert_eq!(sanitize_identifier("user_lookup_2"), "user_lookup_2");
    }

    #[test]
    fn test_strips_punctuation_and_whitespace() {
        assert_eq!(sanitize_identifier("user-lookup v2.1"), "userlookupv21");
        assert_eq!(sanitize_identifier(" \t"), "");
        assert_eq!(sanitize_identifier("héllo"), "hllo");
    }
}
