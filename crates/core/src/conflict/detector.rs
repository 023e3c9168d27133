//! Inbound change classification.
//!
//! Given the reconciled sync records of a workspace and the files currently
//! in the repository, the detector decides per unit whether the incoming
//! version can be applied, is already present, or conflicts with a local
//! edit. It never touches storage.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::git::paths::{match_key, normalize_path};
use crate::models::{ConflictKind, SyncRecord};
use crate::transform::InputContent;

/// A repository file after running the input transformer.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Repository-relative, normalized.
    pub path: String,
    pub text: String,
    pub content: InputContent,
}

/// What to do with one tracked unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    /// Remote unchanged since the last sync.
    Skip,
    /// Local is clean; take the incoming version.
    Apply,
    /// Both sides already hold the same content; only the synced hash moves.
    Converged,
    /// Local is clean and the file is gone remotely.
    Delete,
    Conflict(ConflictKind),
}

/// Classify an incoming version of a tracked file.
pub fn classify_update(record: &SyncRecord, incoming_hash: &str) -> InboundAction {
    if incoming_hash == record.synced_hash {
        InboundAction::Skip
    } else if !record.is_divergent() {
        InboundAction::Apply
    } else if incoming_hash == record.current_hash {
        InboundAction::Converged
    } else if record.is_deletion() {
        InboundAction::Conflict(ConflictKind::EditDelete)
    } else {
        InboundAction::Conflict(ConflictKind::Content)
    }
}

/// Classify a tracked file that no longer exists in the repository.
pub fn classify_removal(record: &SyncRecord) -> InboundAction {
    if record.synced_hash.is_empty() {
        // Never committed: the repository is not expected to have it.
        InboundAction::Skip
    } else if !record.is_divergent() || record.is_deletion() {
        InboundAction::Delete
    } else {
        InboundAction::Conflict(ConflictKind::EditDelete)
    }
}

/// One tracked unit and what the repository says about it.
#[derive(Debug, Clone)]
pub struct PlannedChange<'a> {
    pub record: &'a SyncRecord,
    /// `None` when the file is absent remotely.
    pub file: Option<&'a IncomingFile>,
    pub action: InboundAction,
}

/// Result of [`InboundDetector::plan`].
#[derive(Debug, Clone, Default)]
pub struct InboundPlan<'a> {
    pub changes: Vec<PlannedChange<'a>>,
    /// Files with no tracked unit: candidates for new content.
    pub unmatched: Vec<&'a IncomingFile>,
}

impl<'a> InboundPlan<'a> {
    pub fn has_conflicts(&self) -> bool {
        self.conflicts().next().is_some()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &PlannedChange<'a>> {
        self.changes
            .iter()
            .filter(|c| matches!(c.action, InboundAction::Conflict(_)))
    }
}

/// Stateless matcher of repository files against sync records.
pub struct InboundDetector;

impl InboundDetector {
    /// Match `files` to `records` and classify every record.
    ///
    /// A file matches a record by exact path first; remaining files are then
    /// matched case-insensitively on the normalized path. Each record and
    /// each file is matched at most once.
    pub fn plan<'a>(records: &'a [SyncRecord], files: &'a [IncomingFile]) -> InboundPlan<'a> {
        info!(
            records = records.len(),
            files = files.len(),
            "classifying inbound changes"
        );

        let mut by_path: HashMap<String, usize> = HashMap::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_path.insert(normalize_path(&record.path), idx);
            by_key.entry(match_key(&record.path)).or_insert(idx);
        }

        let mut matched: HashMap<usize, &'a IncomingFile> = HashMap::new();
        let mut leftovers = Vec::new();
        for file in files {
            match by_path.get(&normalize_path(&file.path)) {
                Some(&idx) if !matched.contains_key(&idx) => {
                    matched.insert(idx, file);
                }
                _ => leftovers.push(file),
            }
        }

        let mut unmatched = Vec::new();
        for file in leftovers {
            match by_key.get(&match_key(&file.path)) {
                Some(&idx) if !matched.contains_key(&idx) => {
                    debug!(path = %file.path, record = %records[idx].path, "matched by normalized path");
                    matched.insert(idx, file);
                }
                _ => unmatched.push(file),
            }
        }

        let mut changes = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let file = matched.get(&idx).copied();
            let action = match file {
                Some(f) => classify_update(record, &f.content.content_hash),
                None => classify_removal(record),
            };
            if action != InboundAction::Skip {
                debug!(path = %record.path, ?action, "inbound change");
            }
            changes.push(PlannedChange {
                record,
                file,
                action,
            });
        }

        let conflicts = changes
            .iter()
            .filter(|c| matches!(c.action, InboundAction::Conflict(_)))
            .count();
        info!(
            conflicts,
            new_files = unmatched.len(),
            "inbound classification complete"
        );

        InboundPlan { changes, unmatched }
    }
}
