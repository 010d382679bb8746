//! Identifier syntax checks applied before anything reaches the network.

/// Whether `name` is a valid exchange, channel or format identifier:
/// non-empty ASCII alphanumerics, hyphens or underscores.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Whether `key` has valid API-key syntax. Same alphabet as identifiers but
/// kept separate because key validation happens at client construction, not
/// per request.
pub fn is_valid_api_key(key: &str) -> bool {
    is_valid_name(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_allow_alphanumerics_hyphen_underscore() {
        assert!(is_valid_name("bitmex"));
        assert!(is_valid_name("orderBookL2"));
        assert!(is_valid_name("trade_XBTUSD"));
        assert!(is_valid_name("lightning-board"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("order book"));
        assert!(!is_valid_name("trade/XBTUSD"));
    }

    #[test]
    fn api_keys_use_the_same_alphabet() {
        assert!(is_valid_api_key("demo_key-123"));
        assert!(!is_valid_api_key("demo key"));
        assert!(!is_valid_api_key(""));
    }
}
