//! Error types for avatar-dl
//!
//! This module provides the error taxonomy for the fetch pipeline:
//! - Configuration errors (invalid settings, numeric id columns, empty token files)
//! - Per-credential fatal errors (invalid token)
//! - Transient failures (rate limiting, connection errors, unrecognized API replies)
//! - Local failures (I/O, image decoding)
//!
//! Transient failures are absorbed inside the pipeline and retried across
//! rounds; only fatal and permanent failures cross the boundary to the caller.

use thiserror::Error;

/// Result type alias for avatar-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for avatar-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "resolution")
        key: Option<String>,
    },

    /// The identity API rejected a credential. Fatal for that credential;
    /// surfaced immediately rather than silently retried.
    #[error("invalid API token (…{token_hint})")]
    InvalidToken {
        /// Last few characters of the rejected token, for operator diagnosis
        token_hint: String,
    },

    /// Still rate-limited after the inner retry budget was spent.
    /// Transient: the id stays eligible for the next round.
    #[error("rate limited resolving user {user_id} after {retries} inner retries")]
    RateLimited {
        /// The user id whose resolution was rate-limited
        user_id: String,
        /// Number of inner retries that were attempted
        retries: u32,
    },

    /// Unrecognized error body from the identity API
    #[error("identity API error for user {user_id}: {message}")]
    Api {
        /// The user id the request was for
        user_id: String,
        /// The error message returned by the API
        message: String,
    },

    /// Network-level failure (connect, timeout, malformed response body)
    #[error("connection error: {0}")]
    Connection(String),

    /// Image decoding or encoding failed
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

/// Trait for errors that can be classified as transient or permanent
///
/// Transient failures (rate limiting, connection resets, unrecognized API
/// replies) keep the affected id eligible for the next fetch round.
/// Permanent failures (bad configuration, rejected credentials, undecodable
/// image bytes) should not be retried.
pub trait IsTransient {
    /// Returns true if the error is transient and the id should be retried
    fn is_transient(&self) -> bool;
}

impl IsTransient for Error {
    fn is_transient(&self) -> bool {
        match self {
            // Network failures and rate limiting resolve themselves with time
            Error::Connection(_) | Error::RateLimited { .. } => true,
            // Unrecognized API bodies are retried once more in a later round
            Error::Api { .. } => true,
            // A rejected credential never becomes valid again
            Error::InvalidToken { .. } => false,
            // Config errors require operator action
            Error::Config { .. } => false,
            // Undecodable bytes stay undecodable
            Error::Image(_) => false,
            Error::Io(_) => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Redact a token down to its last few characters for log-safe display.
pub(crate) fn token_hint(token: &str) -> String {
    const VISIBLE: usize = 6;
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= VISIBLE {
        token.to_string()
    } else {
        chars[chars.len() - VISIBLE..].iter().collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_transient() {
        assert!(Error::Connection("reset by peer".into()).is_transient());
    }

    #[test]
    fn rate_limited_is_transient() {
        let err = Error::RateLimited {
            user_id: "111".into(),
            retries: 3,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn unknown_api_error_is_transient() {
        let err = Error::Api {
            user_id: "111".into(),
            message: "something odd".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn invalid_token_is_not_transient() {
        let err = Error::InvalidToken {
            token_hint: "abcdef".into(),
        };
        assert!(
            !err.is_transient(),
            "a rejected credential must not be retried"
        );
    }

    #[test]
    fn config_error_is_not_transient() {
        let err = Error::Config {
            message: "bad resolution".into(),
            key: Some("resolution".into()),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn io_error_is_not_transient() {
        let err = Error::Io(std::io::Error::other("disk fail"));
        assert!(!err.is_transient());
    }

    #[test]
    fn token_hint_redacts_long_tokens() {
        let hint = token_hint("MTAxMDg4NTQxNDg1MDE1NDU4Nw.GaBcDe.xyzxyzxyzxyz");
        assert_eq!(hint.chars().count(), 6);
        assert!(!hint.contains("MTAxMDg"), "prefix must not survive redaction");
    }

    #[test]
    fn token_hint_keeps_short_strings_whole() {
        assert_eq!(token_hint("abc"), "abc");
    }

    #[test]
    fn display_messages_carry_context() {
        let err = Error::Api {
            user_id: "42".into(),
            message: "weird body".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("weird body"));
    }
}
