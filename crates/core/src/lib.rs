//! contentsync core library.
//!
//! This crate provides the building blocks for keeping headless-CMS content
//! in sync with a hosted Git repository: the structured document model,
//! Markdown transformers, change tracking, the Git sync integration, the
//! live-editor write debouncer, and version history with structural diffs.

pub mod config;
pub mod conflict;
pub mod db;
pub mod document;
pub mod errors;
pub mod git;
pub mod git_sync;
pub mod history;
pub mod ids;
pub mod live;
pub mod models;
pub mod tracker;
pub mod transform;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use document::{Document, Node, NodeKind};
pub use git::{GitHubClient, GitProvider};
pub use git_sync::{CommitOutcome, GitSync, PullOutcome};
pub use history::VersionHistory;
pub use ids::{ContentUnit, WorkspaceId};
pub use live::{EditDebouncer, LiveDocumentSource};
pub use tracker::ChangeTracker;
pub use transform::Transformer;
