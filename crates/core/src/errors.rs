//! Error types for the contentsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Staleness is deliberately absent here: a commit against a moved branch is
//! reported as [`crate::git_sync::CommitOutcome::Stale`], not as an error.

use std::fmt;

use thiserror::Error;

use crate::ids::{ConflictId, ContentUnit};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Transformer errors
// ---------------------------------------------------------------------------

/// A position inside the external text representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// 1-indexed line.
    pub line: usize,
    /// 1-indexed column.
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors raised while converting between the structured tree and text.
///
/// These are never retried: the same input always fails the same way.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The frontmatter block could not be parsed.
    #[error("malformed frontmatter{}: {detail}", fmt_location(.location))]
    Frontmatter {
        location: Option<Location>,
        detail: String,
    },

    /// The text contains a construct the structured model cannot represent.
    #[error("unsupported {construct}{}: {fragment}", fmt_location(.location))]
    Unsupported {
        construct: String,
        fragment: String,
        location: Option<Location>,
    },

    /// A stored structured buffer could not be decoded.
    #[error("invalid document buffer: {0}")]
    InvalidBuffer(String),

    /// The document has no markdown form that reads back as the same tree.
    #[error("document cannot be written as markdown: {0}")]
    Unrepresentable(String),

    /// One entry of a batch failed; the whole batch is rejected.
    #[error("batch entry {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<TransformError>,
    },
}

fn fmt_location(location: &Option<Location>) -> String {
    match location {
        Some(loc) => format!(" at {loc}"),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the Git sync integration and change tracker.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No Git sync configuration exists for the workspace.
    #[error("git sync is not configured for workspace {0}")]
    NotConfigured(String),

    /// A configuration already exists; it must be reset first.
    #[error("git sync is already configured for workspace {0}")]
    AlreadyConfigured(String),

    /// The stored synced hash no longer matches what the caller expected.
    #[error("conflict on {unit}: expected synced hash '{expected}', found '{actual}'")]
    Conflict {
        unit: ContentUnit,
        expected: String,
        actual: String,
    },

    /// A referenced content unit does not exist locally.
    #[error("content unit {0} not found")]
    UnknownContent(ContentUnit),

    /// A referenced conflict does not exist in the workspace.
    #[error("conflict {0} not found")]
    UnknownConflict(ConflictId),

    /// A repository path could not be mapped or is invalid.
    #[error("invalid repository path '{path}': {detail}")]
    InvalidPath { path: String, detail: String },

    /// Transformer failure during a sync operation.
    #[error("sync transform error: {0}")]
    Transform(#[from] TransformError),

    /// External Git system failure.
    #[error("sync external error: {0}")]
    External(#[from] GitHubError),

    /// Database error during sync.
    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from the external Git hosting API.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The configured branch does not exist.
    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    /// JSON or payload decoding failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

impl GitHubError {
    /// Whether retrying an idempotent read could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// History errors
// ---------------------------------------------------------------------------

/// Errors from the version history store and diff engine.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The requested snapshot does not exist.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// There is no live document to compare against.
    #[error("no live content for {0}")]
    NoLiveContent(ContentUnit),

    #[error("history transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("history database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A JSON column could not be (de)serialized.
    #[error("database JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
