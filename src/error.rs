//! Custom error types for rustlibkey.
//!
//! Errors only travel between the HTTP clients and the waterfall. The waterfall
//! converts every one of them into a "nothing to show" decision, so nothing in
//! this module ever reaches the presentation layer.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Main error type for rustlibkey operations.
#[derive(Debug, Error)]
pub enum LibKeyError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response payload could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from API
        message: String,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (missing key, bad settings file)
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using `LibKeyError`
pub type Result<T> = std::result::Result<T, LibKeyError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a config error message
    fn ok_or_config(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LibKeyError::Config(msg.to_string()))
    }
}

fn token_pattern() -> Option<&'static Regex> {
    static TOKEN_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN_PATTERN
        .get_or_init(|| Regex::new(r"(access_token|apiKey)=[^&\s]*").ok())
        .as_ref()
}

/// Replace access tokens and API keys embedded in a URL or message.
pub fn redact_tokens(value: &str) -> String {
    match token_pattern() {
        Some(re) => re.replace_all(value, "${1}=[REDACTED]").into_owned(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_tokens() {
        assert_eq!(
            redact_tokens("https://x/y?access_token=abc123&include=journal"),
            "https://x/y?access_token=[REDACTED]&include=journal"
        );
        assert_eq!(redact_tokens("apiKey=secret other"), "apiKey=[REDACTED] other");
        assert_eq!(redact_tokens("nothing here"), "nothing here");
        assert_eq!(
            redact_tokens("a?apiKey=k1&access_token=t2"),
            "a?apiKey=[REDACTED]&access_token=[REDACTED]"
        );
    }

    #[test]
    fn test_option_ext() {
        let missing: Option<u8> = None;
        assert!(matches!(missing.ok_or_config("libraryId"), Err(LibKeyError::Config(_))));
        assert_eq!(Some(3).ok_or_config("x").ok(), Some(3));
    }
}
