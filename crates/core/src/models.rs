//! Domain model types used throughout contentsync.
//!
//! These types bridge the sync integration, the database layer, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    ConflictId, ContentGroupId, ContentPieceId, ContentUnit, SnapshotId, VariantId, WorkspaceId,
};

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Metadata a text format can embed alongside the document body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_link: Option<String>,
}

/// A content piece row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPiece {
    pub id: ContentPieceId,
    pub workspace_id: WorkspaceId,
    pub content_group_id: ContentGroupId,
    /// Explicit repository filename (without directory); derived from the
    /// title when absent.
    pub filename: Option<String>,
    pub metadata: ContentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A content variant (e.g. a translation) of every piece in a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub workspace_id: WorkspaceId,
    /// Short key, used as a repository subdirectory name.
    pub key: String,
}

/// A content group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentGroup {
    pub id: ContentGroupId,
    pub workspace_id: WorkspaceId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Git sync
// ---------------------------------------------------------------------------

/// Tracking state of one content unit under Git sync.
///
/// `synced_hash == current_hash` means clean; an empty `current_hash` means
/// the unit was deleted locally and the file is pending removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub unit: ContentUnit,
    pub path: String,
    pub synced_hash: String,
    pub current_hash: String,
}

impl SyncRecord {
    pub fn is_divergent(&self) -> bool {
        self.synced_hash != self.current_hash
    }

    pub fn is_deletion(&self) -> bool {
        self.current_hash.is_empty()
    }

    pub fn is_addition(&self) -> bool {
        self.synced_hash.is_empty() && !self.current_hash.is_empty()
    }
}

/// Maps a repository subdirectory to a content group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub path: String,
    pub content_group_id: ContentGroupId,
}

/// The external repository provider kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    GitHub,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub => write!(f, "github"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::GitHub),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Which text format the repository stores content in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformerKind {
    #[default]
    Markdown,
    Docusaurus,
}

impl std::fmt::Display for TransformerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Docusaurus => write!(f, "docusaurus"),
        }
    }
}

impl std::str::FromStr for TransformerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(Self::Markdown),
            "docusaurus" => Ok(Self::Docusaurus),
            other => Err(format!("unknown transformer '{other}'")),
        }
    }
}

/// Provider-specific location data (credentials stay in the environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// `owner/repo`.
    pub repository: String,
    pub branch: String,
    /// Repository subdirectory all synced content lives under ("" = root).
    #[serde(default)]
    pub base_directory: String,
    #[serde(default)]
    pub transformer: TransformerKind,
    /// Place variant files in a `<variant key>/` subdirectory.
    #[serde(default = "default_true")]
    pub variant_subdirectories: bool,
}

fn default_true() -> bool {
    true
}

/// One workspace's Git sync setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSyncConfiguration {
    pub workspace_id: WorkspaceId,
    pub provider: ProviderConfig,
    pub directories: Vec<Directory>,
    pub records: Vec<SyncRecord>,
    pub last_commit_id: Option<String>,
    pub last_commit_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Version history
// ---------------------------------------------------------------------------

/// Immutable capture of a unit's structured document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: SnapshotId,
    pub workspace_id: WorkspaceId,
    pub unit: ContentUnit,
    pub label: Option<String>,
    /// Canonical structured buffer.
    #[serde(skip)]
    pub buffer: Vec<u8>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Categorisation of an inbound conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the content.
    Content,
    /// One side edited, the other deleted.
    EditDelete,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::EditDelete => write!(f, "edit_delete"),
        }
    }
}

impl ConflictKind {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "edit_delete" => Self::EditDelete,
            _ => Self::Content,
        }
    }
}

/// Lifecycle status of a persisted conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl std::fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl ConflictStatus {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "resolved" => Self::Resolved,
            _ => Self::Pending,
        }
    }
}

/// A conflict between a local edit and an incoming repository change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub workspace_id: WorkspaceId,
    pub unit: ContentUnit,
    pub path: String,
    pub kind: ConflictKind,
    /// Incoming text; `None` when the file was deleted remotely.
    pub incoming_text: Option<String>,
    pub incoming_hash: Option<String>,
    /// Synced hash at detection time; resolution must present it back.
    pub synced_hash: String,
    pub current_hash: String,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit Log
// ---------------------------------------------------------------------------

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Option<i64>,
    pub workspace_id: Option<WorkspaceId>,
    pub action: String,
    pub details: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn success(workspace_id: WorkspaceId, action: &str, details: &str) -> Self {
        Self {
            id: None,
            workspace_id: Some(workspace_id),
            action: action.to_string(),
            details: details.to_string(),
            success: true,
            created_at: Utc::now(),
        }
    }

    pub fn failure(workspace_id: WorkspaceId, action: &str, details: &str) -> Self {
        Self {
            success: false,
            ..Self::success(workspace_id, action, details)
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// State of the sync state machine for a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unconfigured,
    Configured,
    Committing,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Configured => write!(f, "configured"),
            Self::Committing => write!(f, "committing"),
        }
    }
}

/// High-level sync status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub repository: Option<String>,
    pub last_commit_id: Option<String>,
    pub last_commit_date: Option<DateTime<Utc>>,
    pub tracked: usize,
    pub pending_additions: usize,
    pub pending_updates: usize,
    pub pending_deletions: usize,
    pub pending_conflicts: usize,
}
