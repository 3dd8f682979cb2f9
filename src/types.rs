//! Core types for avatar-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a user on the external identity service.
///
/// Identifiers are opaque, numeric-looking strings. Spreadsheet ingestion
/// conventionally prefixes them with underscores to keep them textual; those
/// underscores and any surrounding whitespace are stripped on construction.
/// Identifiers that do not parse as a number are never submitted to the
/// network layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a UserId, trimming whitespace and stripping underscores
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().replace('_', ""))
    }

    /// Whether the identifier looks like a number and may be sent to the API
    pub fn is_numeric(&self) -> bool {
        self.0.parse::<u64>().is_ok()
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// One cell of the id column as handed over by the tabular-data collaborator.
///
/// Spreadsheet readers type whole columns; a column that parsed as numbers
/// means the operator forgot the underscore convention and precision may
/// already be lost. That is a configuration error, not something the fetch
/// pipeline can retry around.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    /// A textual cell, the expected shape for identifiers
    Text(String),
    /// A numeric-typed cell — always a configuration error for an id column
    Number(f64),
    /// An empty cell, silently skipped
    Empty,
}

/// Build the candidate roster from a raw id column.
///
/// Returns a configuration error if any cell carries a numeric type where a
/// textual identifier was expected. Empty cells are dropped.
pub fn roster_from_column(values: &[ColumnValue]) -> Result<Vec<UserId>> {
    if values.iter().any(|v| matches!(v, ColumnValue::Number(_))) {
        return Err(Error::Config {
            message: "the id column has a numeric data type instead of the expected \
                      string data type; prefix every user id with an underscore"
                .to_string(),
            key: Some("uid".to_string()),
        });
    }

    Ok(values
        .iter()
        .filter_map(|v| match v {
            ColumnValue::Text(s) if !s.trim().is_empty() => Some(UserId::new(s)),
            _ => None,
        })
        .collect())
}

/// Final report of one orchestrator run.
///
/// Permanently-unresolved ids are listed exactly once; the caller degrades
/// their slides to an empty placeholder rather than aborting.
#[derive(Clone, Debug, Default)]
pub struct FetchReport {
    /// Ids whose avatar file was written to the cache during this run
    pub downloaded: Vec<UserId>,
    /// Ids that terminated without a file: non-numeric, or no avatar upstream
    pub skipped: Vec<UserId>,
    /// Ids still unresolved after all rounds were spent
    pub unresolved: Vec<UserId>,
    /// Redacted hints of credentials the API rejected during the run
    pub invalid_tokens: Vec<String>,
    /// Number of rounds actually executed
    pub rounds: u32,
}

impl FetchReport {
    /// True when every candidate either produced a file or was skipped
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Outcome of one fetch task within a round.
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    /// Avatar written to the cache at this path
    Success(PathBuf),
    /// Terminal non-error: non-numeric id or account without an avatar
    Skip,
    /// Classified failure; transient ones stay eligible for the next round
    Failed(Error),
}
