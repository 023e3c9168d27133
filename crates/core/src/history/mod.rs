//! Version history: append-only document snapshots and diffs between them.

pub mod diff;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::db::Database;
use crate::document::{decode, encode, hash_buffer, Document, Node};
use crate::errors::{HistoryError, TransformError};
use crate::ids::{ContentUnit, SnapshotId, WorkspaceId};
use crate::models::DocumentSnapshot;

pub use diff::{changed_nodes, diff, ChangedNode, DiffNode, DiffTag};

/// Build a snapshot of `buffer` without storing it.
///
/// The buffer is kept verbatim; it must decode as a document.
pub fn new_snapshot(
    workspace_id: WorkspaceId,
    unit: &ContentUnit,
    buffer: &[u8],
    label: Option<&str>,
) -> Result<DocumentSnapshot, TransformError> {
    let doc = decode(buffer)?;
    Ok(DocumentSnapshot {
        id: SnapshotId::new(),
        workspace_id,
        unit: unit.clone(),
        label: label.map(str::to_string),
        buffer: buffer.to_vec(),
        content_hash: hash_buffer(&encode(&doc)),
        created_at: Utc::now(),
    })
}

/// Snapshot store and diff front-end over the document database.
#[derive(Clone)]
pub struct VersionHistory {
    db: Arc<Database>,
}

impl VersionHistory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Capture the current stored document of `unit`.
    pub fn snapshot(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
        label: Option<&str>,
    ) -> Result<DocumentSnapshot, HistoryError> {
        let buffer = self
            .db
            .get_content_buffer(unit)?
            .ok_or_else(|| HistoryError::NoLiveContent(unit.clone()))?;
        let snapshot = new_snapshot(workspace_id, unit, &buffer, label)?;
        self.db.insert_snapshot(&snapshot)?;
        info!(id = %snapshot.id, %unit, label, "snapshot taken");
        Ok(snapshot)
    }

    /// Snapshots of `unit`, oldest first.
    pub fn list(&self, unit: &ContentUnit) -> Result<Vec<DocumentSnapshot>, HistoryError> {
        Ok(self.db.list_snapshots(unit)?)
    }

    pub fn get(&self, id: SnapshotId) -> Result<DocumentSnapshot, HistoryError> {
        self.db
            .get_snapshot(id)?
            .ok_or_else(|| HistoryError::SnapshotNotFound(id.to_string()))
    }

    /// Diff snapshot `from` against snapshot `to`.
    pub fn diff_versions(&self, from: SnapshotId, to: SnapshotId) -> Result<DiffNode, HistoryError> {
        let old = self.document(from)?;
        let new = self.document(to)?;
        Ok(diff(&old, &new))
    }

    /// Diff a snapshot against the one taken before it.
    ///
    /// The first snapshot of a unit is diffed against an empty document.
    pub fn diff_with_previous(&self, id: SnapshotId) -> Result<DiffNode, HistoryError> {
        let snapshot = self.get(id)?;
        let history = self.list(&snapshot.unit)?;
        let previous = history
            .iter()
            .position(|s| s.id == id)
            .and_then(|idx| idx.checked_sub(1))
            .map(|idx| &history[idx]);
        let old = match previous {
            Some(prev) => decode(&prev.buffer)?,
            None => Node::doc(Vec::new()),
        };
        debug!(%id, previous = ?previous.map(|p| p.id), "diffing with previous snapshot");
        Ok(diff(&old, &decode(&snapshot.buffer)?))
    }

    /// Diff a snapshot against the live stored document of its unit.
    pub fn diff_with_live(&self, id: SnapshotId) -> Result<DiffNode, HistoryError> {
        let snapshot = self.get(id)?;
        let live = self
            .db
            .get_content_buffer(&snapshot.unit)?
            .ok_or_else(|| HistoryError::NoLiveContent(snapshot.unit.clone()))?;
        Ok(diff(&decode(&snapshot.buffer)?, &decode(&live)?))
    }

    fn document(&self, id: SnapshotId) -> Result<Document, HistoryError> {
        Ok(decode(&self.get(id)?.buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ContentGroupId;
    use crate::models::ContentMetadata;

    fn para(text: &str) -> Node {
        Node::paragraph(vec![Node::text(text)])
    }

    fn setup() -> (VersionHistory, Arc<Database>, WorkspaceId, ContentUnit) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let ws = WorkspaceId::new();
        let group: ContentGroupId = db.create_content_group(ws, "Docs").unwrap().id;
        let buffer = encode(&Node::doc(vec![para("first"), para("last")]));
        let piece = db
            .create_content_piece(ws, group, ContentMetadata::default(), None, &buffer)
            .unwrap();
        (
            VersionHistory::new(db.clone()),
            db,
            ws,
            ContentUnit::piece(piece.id),
        )
    }

    #[test]
    fn test_snapshots_are_listed_in_order() {
        let (history, db, ws, unit) = setup();
        let v1 = history.snapshot(ws, &unit, Some("v1")).unwrap();
        db.set_content_buffer(
            &unit,
            &encode(&Node::doc(vec![para("first"), para("middle"), para("last")])),
        )
        .unwrap();
        let v2 = history.snapshot(ws, &unit, None).unwrap();

        let listed: Vec<SnapshotId> = history.list(&unit).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![v1.id, v2.id]);
        assert_eq!(history.get(v1.id).unwrap().label.as_deref(), Some("v1"));
        assert_ne!(v1.content_hash, v2.content_hash);

        let d = history.diff_versions(v1.id, v2.id).unwrap();
        assert_eq!(
            changed_nodes(&d),
            vec![(DiffTag::Added, crate::document::NodeKind::Paragraph, "middle".to_string())]
        );
        assert_eq!(history.diff_with_previous(v2.id).unwrap(), d);
    }

    #[test]
    fn test_first_snapshot_diffs_against_empty() {
        let (history, _db, ws, unit) = setup();
        let v1 = history.snapshot(ws, &unit, None).unwrap();
        let d = history.diff_with_previous(v1.id).unwrap();
        assert_eq!(changed_nodes(&d).len(), 2);
        assert!(d.content.iter().all(|n| n.diff == Some(DiffTag::Added)));
    }

    #[test]
    fn test_diff_with_live() {
        let (history, db, ws, unit) = setup();
        let v1 = history.snapshot(ws, &unit, None).unwrap();
        assert!(!history.diff_with_live(v1.id).unwrap().has_changes());

        db.set_content_buffer(&unit, &encode(&Node::doc(vec![para("first")])))
            .unwrap();
        let d = history.diff_with_live(v1.id).unwrap();
        assert_eq!(
            changed_nodes(&d),
            vec![(DiffTag::Removed, crate::document::NodeKind::Paragraph, "last".to_string())]
        );
    }

    #[test]
    fn test_missing_snapshot_and_content() {
        let (history, db, ws, unit) = setup();
        assert!(matches!(
            history.get(SnapshotId::new()),
            Err(HistoryError::SnapshotNotFound(_))
        ));
        db.delete_content_unit(&unit).unwrap();
        assert!(matches!(
            history.snapshot(ws, &unit, None),
            Err(HistoryError::NoLiveContent(_))
        ));
    }
}
