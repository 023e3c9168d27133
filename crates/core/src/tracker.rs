//! Change tracker: the registry of synced vs. current content hashes.
//!
//! The tracker only ever writes `current_hash`; `synced_hash` belongs to the
//! Git sync integration, which moves it after a confirmed commit or pull.

use std::sync::Arc;

use tracing::debug;

use crate::db::Database;
use crate::errors::SyncError;
use crate::ids::{ContentUnit, WorkspaceId};
use crate::models::SyncRecord;

/// Hash registry over the sync records of the database.
#[derive(Clone)]
pub struct ChangeTracker {
    db: Arc<Database>,
}

impl ChangeTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the latest local content hash of `unit`.
    ///
    /// Returns `false` when the unit is not tracked yet; such units surface
    /// as pending additions through record reconciliation instead.
    pub fn record_local_change(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
        hash: &str,
    ) -> Result<bool, SyncError> {
        let tracked = self.db.set_current_hash(workspace_id, unit, hash)?;
        debug!(%unit, hash, tracked, "recorded local change");
        Ok(tracked)
    }

    /// Record that `unit` was deleted locally.
    ///
    /// A unit that was never committed has nothing to remove remotely, so its
    /// record is dropped outright.
    pub fn record_deletion(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
    ) -> Result<bool, SyncError> {
        let Some(record) = self.db.get_sync_record(workspace_id, unit)? else {
            return Ok(false);
        };
        if record.synced_hash.is_empty() {
            self.db.delete_sync_record(workspace_id, unit)?;
            debug!(%unit, "dropped record of uncommitted unit");
        } else {
            self.db.set_current_hash(workspace_id, unit, "")?;
            debug!(%unit, path = %record.path, "unit pending removal");
        }
        Ok(true)
    }

    /// Every record whose current hash differs from its synced hash.
    pub fn divergent_units(&self, workspace_id: WorkspaceId) -> Result<Vec<SyncRecord>, SyncError> {
        Ok(self.db.list_divergent_records(workspace_id)?)
    }

    /// Set both hashes of `unit` to `hash`.
    pub fn mark_synced(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
        hash: &str,
    ) -> Result<bool, SyncError> {
        Ok(self.db.mark_synced(workspace_id, unit, hash)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::ids::ContentPieceId;
    use crate::models::{GitSyncConfiguration, ProviderConfig, ProviderKind, TransformerKind};

    fn setup() -> (ChangeTracker, Arc<Database>, WorkspaceId) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let ws = WorkspaceId::new();
        db.insert_git_sync_config(&GitSyncConfiguration {
            workspace_id: ws,
            provider: ProviderConfig {
                kind: ProviderKind::GitHub,
                repository: "acme/docs".into(),
                branch: "main".into(),
                base_directory: String::new(),
                transformer: TransformerKind::Markdown,
                variant_subdirectories: true,
            },
            directories: vec![],
            records: vec![],
            last_commit_id: None,
            last_commit_date: None,
            created_at: Utc::now(),
        })
        .unwrap();
        (ChangeTracker::new(db.clone()), db, ws)
    }

    fn track(db: &Database, ws: WorkspaceId, path: &str, synced: &str) -> ContentUnit {
        let unit = ContentUnit::piece(ContentPieceId::new());
        db.upsert_sync_record(
            ws,
            &SyncRecord {
                unit: unit.clone(),
                path: path.into(),
                synced_hash: synced.into(),
                current_hash: synced.into(),
            },
        )
        .unwrap();
        unit
    }

    #[test]
    fn test_local_change_surfaces_divergence() {
        let (tracker, db, ws) = setup();
        let unit = track(&db, ws, "a.md", "h1");
        let _clean = track(&db, ws, "b.md", "h9");

        assert!(tracker.record_local_change(ws, &unit, "h2").unwrap());
        assert!(tracker.record_local_change(ws, &unit, "h2").unwrap());
        let divergent = tracker.divergent_units(ws).unwrap();
        assert_eq!(divergent.len(), 1);
        assert_eq!(divergent[0].unit, unit);
        assert_eq!(divergent[0].synced_hash, "h1");
        assert_eq!(divergent[0].current_hash, "h2");
    }

    #[test]
    fn test_mark_synced_clears_divergence() {
        let (tracker, db, ws) = setup();
        let unit = track(&db, ws, "a.md", "h1");
        tracker.record_local_change(ws, &unit, "h2").unwrap();
        tracker.mark_synced(ws, &unit, "h2").unwrap();
        assert!(tracker.divergent_units(ws).unwrap().is_empty());
    }

    #[test]
    fn test_untracked_change_is_ignored() {
        let (tracker, _db, ws) = setup();
        let unit = ContentUnit::piece(ContentPieceId::new());
        assert!(!tracker.record_local_change(ws, &unit, "h1").unwrap());
        assert!(!tracker.record_deletion(ws, &unit).unwrap());
    }

    #[test]
    fn test_deletion_marks_or_drops() {
        let (tracker, db, ws) = setup();
        let committed = track(&db, ws, "a.md", "h1");
        let fresh = track(&db, ws, "b.md", "");
        db.set_current_hash(ws, &fresh, "h5").unwrap();

        tracker.record_deletion(ws, &committed).unwrap();
        tracker.record_deletion(ws, &fresh).unwrap();

        let record = db.get_sync_record(ws, &committed).unwrap().unwrap();
        assert!(record.is_deletion());
        assert!(db.get_sync_record(ws, &fresh).unwrap().is_none());
    }
}
