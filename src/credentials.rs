//! Credential pool — ordered API tokens with round-robin assignment
//!
//! Multiple credentials are rotated to raise aggregate throughput under
//! per-credential rate limits. Assignment is cyclic per round: each token
//! receives either ⌈N/T⌉ or ⌊N/T⌋ of a round's N tasks.

use crate::error::{Error, Result, token_hint};
use std::path::Path;

/// A token line shorter than this cannot be a real credential and is dropped
/// during file parsing.
const MIN_TOKEN_LEN: usize = 70;

/// Ordered set of bearer credentials for the identity API.
///
/// The pool owns the tokens exclusively; a task borrows one token for its
/// lifetime, and a retried task may receive a different token in a later
/// round. Assignment restarts at the first token for each new round.
#[derive(Clone, Debug)]
pub struct CredentialPool {
    tokens: Vec<String>,
}

impl CredentialPool {
    /// Create a pool from an ordered token list.
    ///
    /// Returns a configuration error when the list is empty — avatar mode
    /// requires at least one credential.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::Config {
                message: "no API tokens available; avatar mode requires at least one".to_string(),
                key: Some("tokens".to_string()),
            });
        }
        Ok(Self { tokens })
    }

    /// Load a pool from a credentials file, one token per line.
    ///
    /// Lines are stripped of surrounding double quotes and whitespace, and
    /// anything too short to be a credential is dropped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let tokens: Vec<String> = raw
            .lines()
            .map(|line| line.replace('"', "").trim().to_string())
            .filter(|line| line.len() > MIN_TOKEN_LEN)
            .collect();

        tracing::debug!(path = %path.display(), count = tokens.len(), "Loaded credential file");
        Self::new(tokens)
    }

    /// Number of credentials in the pool
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the pool has no credentials left
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The tokens in pool order
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Cyclic assignment for one round of `n` tasks.
    ///
    /// Yields exactly `n` tokens, cycling through the pool from the first
    /// token. With T tokens, no token is yielded more than ⌈n/T⌉ times.
    pub fn assign(&self, n: usize) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str).cycle().take(n)
    }

    /// Remove a credential the API has rejected.
    ///
    /// Returns true if the token was present. Other credentials keep
    /// working; the pool only becomes unusable once every token is retired.
    pub fn retire(&mut self, token: &str) -> bool {
        let before = self.tokens.len();
        self.tokens.retain(|t| t != token);
        let removed = self.tokens.len() < before;
        if removed {
            tracing::warn!(token = %token_hint(token), "Retired rejected credential");
        }
        removed
    }
}
