//! Error types for the manifest pipeline and the lookup path.
//!
//! The pipeline fails fast: every [`ManifestError`] aborts the run and is
//! returned to whoever triggered it. The lookup path is the user-facing one,
//! so [`LookupError`] is kept separate and callers are expected to turn it
//! into a degraded response (see [`crate::lookup::QueryOutcome`]).

use std::path::PathBuf;
use thiserror::Error;

use crate::models::DefinitionTable;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned HTTP {status}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("upstream platform error {code} ({status}): {message}")]
    UpstreamApi {
        code: i64,
        status: String,
        message: String,
    },

    #[error("malformed manifest pointer: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("manifest has no content path for locale '{0}'")]
    MissingLocale(String),

    #[error("unable to read manifest archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive entry escapes the destination directory: {0}")]
    UnsafeEntry(String),

    #[error("archive entry {entry} would overwrite {}", path.display())]
    ReservedEntry { entry: String, path: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("malformed definition in {table} at row {row_id}: {source}")]
    MalformedItem {
        table: DefinitionTable,
        row_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate hash {hash} in {table}")]
    DuplicateHash { table: DefinitionTable, hash: String },

    #[error("no content store named {expected} in the extracted archive")]
    MissingContentStore { expected: String },

    #[error("raw content store has no table {0}")]
    MissingSourceTable(DefinitionTable),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ManifestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManifestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Machine-readable error code, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            ManifestError::Config(_) => "config",
            ManifestError::Transport { source, .. } if source.is_timeout() => "timeout",
            ManifestError::Transport { .. } => "transport",
            ManifestError::UpstreamStatus { .. } | ManifestError::UpstreamApi { .. } => {
                "upstream"
            }
            ManifestError::Decode(_)
            | ManifestError::MissingLocale(_)
            | ManifestError::Archive(_)
            | ManifestError::UnsafeEntry(_)
            | ManifestError::ReservedEntry { .. }
            | ManifestError::MalformedItem { .. }
            | ManifestError::MissingContentStore { .. }
            | ManifestError::MissingSourceTable(_) => "decode",
            ManifestError::Io { .. } | ManifestError::Task(_) => "io",
            ManifestError::Store(_) => "store",
            ManifestError::DuplicateHash { .. } => "duplicate_hash",
        }
    }

    /// Transport failures may succeed on a later run; nothing else will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ManifestError::Transport { .. })
    }
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("unable to load destiny manifest file {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("unable to query the destiny manifest: {0}")]
    Query(#[from] sqlx::Error),

    #[error("stored definition {hash} is not valid JSON: {source}")]
    Malformed {
        hash: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ManifestError::MissingLocale("en".into()).kind(), "decode");
        assert_eq!(
            ManifestError::DuplicateHash {
                table: DefinitionTable::InventoryItem,
                hash: "100".into()
            }
            .kind(),
            "duplicate_hash"
        );
        assert_eq!(
            ManifestError::UpstreamStatus {
                url: "http://x".into(),
                status: 500
            }
            .kind(),
            "upstream"
        );
        assert!(!ManifestError::Config("x".into()).is_retryable());
    }

    #[test]
    fn test_duplicate_message_names_table() {
        let err = ManifestError::DuplicateHash {
            table: DefinitionTable::InventoryItem,
            hash: "100".into(),
        };
        assert_eq!(
            err.to_string(),
            "duplicate hash 100 in DestinyInventoryItemDefinition"
        );
    }
}
