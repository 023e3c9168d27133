//! Git sync integration.
//!
//! Owns the per-workspace [`GitSyncConfiguration`] and drives both directions
//! of synchronization:
//!
//! 1. **Outbound** ([`GitSync::commit`]) -- every divergent record is
//!    rendered through the output transformer and sent to the provider as a
//!    single commit, guarded by the last known branch head. A stale head
//!    leaves all local state untouched.
//! 2. **Inbound** ([`GitSync::pull`]) -- repository files are parsed, matched
//!    to records (by path, then by normalized path) and applied, or reported
//!    as conflicts when a local edit is in the way.
//! 3. **Resolution** ([`GitSync::resolve_conflict`],
//!    [`GitSync::resolve_pending`]) -- applies a user's choice, guarded by the
//!    synced hash the choice was made against.
//!
//! Commits, pulls and resolutions of one workspace are serialized by a
//! per-workspace async mutex.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::conflict::{InboundAction, InboundDetector, IncomingFile, PlannedChange, Resolution};
use crate::db::queries::{
    delete_content_unit_tx, delete_sync_record_tx, get_content_buffer_tx, insert_content_piece_tx,
    insert_snapshot_tx, mark_committed_tx, set_content_buffer_tx, update_last_commit_tx,
    update_metadata_tx, upsert_sync_record_tx,
};
use crate::db::Database;
use crate::document::{decode, hash_buffer, Node};
use crate::errors::SyncError;
use crate::git::paths::{
    directory_for, file_stem, join, match_key, normalize_path, slugify, strip_base, PathRules,
};
use crate::git::provider::{CommitRequest, CommitResult, FileAddition, GitProvider, RemoteHead};
use crate::history::{diff, new_snapshot, DiffNode};
use crate::ids::{ConflictId, ContentPieceId, ContentUnit, VariantId, WorkspaceId};
use crate::models::{
    AuditEntry, Conflict, ConflictKind, ConflictStatus, ContentPiece, Directory,
    DocumentSnapshot, GitSyncConfiguration, ProviderConfig, SyncRecord, SyncState, SyncStatus,
    Variant,
};
use crate::tracker::ChangeTracker;
use crate::transform::{
    canonical_hash, ContentPieceContext, InputContentProcessor, OutputContent,
    OutputContentProcessor, Transformer,
};

/// Result of [`GitSync::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        commit_id: String,
        commit_date: DateTime<Utc>,
        additions: usize,
        deletions: usize,
    },
    /// The branch moved since the last sync; nothing changed locally.
    Stale {
        expected: Option<String>,
        remote_head: String,
    },
    NothingToCommit,
}

/// What a conflict-free pull applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub commit_id: String,
    pub applied: usize,
    pub created: usize,
    pub deleted: usize,
    pub converged: usize,
    /// Incoming files under no mapped directory.
    pub skipped: Vec<String>,
}

/// A persisted conflict together with the structural diff local -> incoming.
#[derive(Debug, Clone)]
pub struct ConflictReport {
    pub conflict: Conflict,
    pub diff: DiffNode,
}

/// Result of [`GitSync::pull`].
#[derive(Debug, Clone)]
pub enum PullOutcome {
    /// The branch head equals the last synced commit and no unit changed.
    UpToDate,
    Applied(PullSummary),
    /// Nothing was applied; the conflicts are pending resolution.
    Conflicts(Vec<ConflictReport>),
}

/// Git sync integration over the content database.
pub struct GitSync {
    db: Arc<Database>,
    tracker: ChangeTracker,
    path_rules: PathRules,
    locks: Mutex<HashMap<WorkspaceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl GitSync {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            tracker: ChangeTracker::new(db.clone()),
            db,
            path_rules: PathRules::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Restrict inbound files to those matching `rules`.
    pub fn with_path_rules(mut self, rules: PathRules) -> Self {
        self.path_rules = rules;
        self
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn workspace_lock(&self, workspace_id: WorkspaceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(workspace_id).or_default().clone()
    }

    fn load_config(&self, workspace_id: WorkspaceId) -> Result<GitSyncConfiguration, SyncError> {
        self.db
            .get_git_sync_config(workspace_id)?
            .ok_or_else(|| SyncError::NotConfigured(workspace_id.to_string()))
    }

    fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.db.insert_audit_entry(&entry) {
            warn!(error = %e, action = %entry.action, "failed to write audit entry");
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Create the Git sync configuration of a workspace.
    ///
    /// The current branch head becomes the last known commit, so the first
    /// commit is already guarded against concurrent pushes.
    pub async fn configure(
        &self,
        workspace_id: WorkspaceId,
        mut provider_config: ProviderConfig,
        directories: Vec<Directory>,
        provider: &dyn GitProvider,
    ) -> Result<GitSyncConfiguration, SyncError> {
        if self.db.has_git_sync_config(workspace_id)? {
            return Err(SyncError::AlreadyConfigured(workspace_id.to_string()));
        }

        provider_config.base_directory = normalize_path(&provider_config.base_directory);
        let mut seen = HashSet::new();
        let mut mapped = Vec::with_capacity(directories.len());
        for dir in directories {
            let path = normalize_path(&dir.path);
            if path.is_empty() {
                return Err(SyncError::InvalidPath {
                    path: dir.path,
                    detail: "directory path is empty".into(),
                });
            }
            if !seen.insert(match_key(&path)) {
                return Err(SyncError::InvalidPath {
                    path,
                    detail: "directory is mapped twice".into(),
                });
            }
            mapped.push(Directory {
                path,
                content_group_id: dir.content_group_id,
            });
        }

        let head = provider.head().await?;
        let config = GitSyncConfiguration {
            workspace_id,
            provider: provider_config,
            directories: mapped,
            records: Vec::new(),
            last_commit_id: Some(head.commit_id),
            last_commit_date: Some(head.commit_date),
            created_at: Utc::now(),
        };
        self.db.insert_git_sync_config(&config)?;

        let details = format!(
            "{}@{} ({} directories)",
            config.provider.repository,
            config.provider.branch,
            config.directories.len()
        );
        info!(%workspace_id, %details, "git sync configured");
        self.audit(AuditEntry::success(workspace_id, "configure", &details));
        Ok(config)
    }

    /// The configuration of a workspace, if any.
    pub fn configuration(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<GitSyncConfiguration>, SyncError> {
        Ok(self.db.get_git_sync_config(workspace_id)?)
    }

    /// Remove the configuration, its records and its pending conflicts.
    ///
    /// Content and history are kept.
    pub async fn reset(&self, workspace_id: WorkspaceId) -> Result<(), SyncError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        if !self.db.delete_git_sync_config(workspace_id)? {
            return Err(SyncError::NotConfigured(workspace_id.to_string()));
        }
        let cleared = self.db.clear_pending_conflicts(workspace_id)?;
        info!(%workspace_id, cleared, "git sync reset");
        self.audit(AuditEntry::success(
            workspace_id,
            "reset",
            &format!("{cleared} pending conflicts dropped"),
        ));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Sync records of a workspace, reconciled with the stored content.
    ///
    /// Units without a record appear as pending additions at a derived path;
    /// records whose unit is gone appear as pending deletions.
    pub fn get_records(&self, workspace_id: WorkspaceId) -> Result<Vec<SyncRecord>, SyncError> {
        let config = self.load_config(workspace_id)?;
        self.reconcile(&config)
    }

    fn reconcile(&self, config: &GitSyncConfiguration) -> Result<Vec<SyncRecord>, SyncError> {
        let workspace_id = config.workspace_id;
        let transformer = Transformer::from(config.provider.transformer);
        let units = self.db.list_content_units(workspace_id)?;
        let pieces: HashMap<ContentPieceId, ContentPiece> = self
            .db
            .list_content_pieces(workspace_id)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let variants: HashMap<VariantId, Variant> = self
            .db
            .list_variants(workspace_id)?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let live: HashSet<&ContentUnit> = units.iter().collect();
        let mut records = config.records.clone();
        for record in &mut records {
            if !live.contains(&record.unit) && !record.current_hash.is_empty() {
                debug!(unit = %record.unit, path = %record.path, "unit gone, pending removal");
                record.current_hash.clear();
            }
        }

        let tracked: HashSet<ContentUnit> = records.iter().map(|r| r.unit.clone()).collect();
        let mut taken: HashSet<String> = records.iter().map(|r| match_key(&r.path)).collect();
        for unit in units.iter().filter(|u| !tracked.contains(*u)) {
            let Some(piece) = pieces.get(&unit.piece) else {
                continue;
            };
            let variant_key = match unit.variant {
                Some(id) => match variants.get(&id) {
                    Some(v) => Some(v.key.as_str()),
                    None => continue,
                },
                None => None,
            };
            let Some(path) = derive_path(config, &transformer, piece, variant_key, &mut taken)
            else {
                debug!(%unit, "content group is not mapped to a directory");
                continue;
            };
            let Some(buffer) = self.db.get_content_buffer(unit)? else {
                continue;
            };
            records.push(SyncRecord {
                unit: unit.clone(),
                path,
                synced_hash: String::new(),
                current_hash: canonical_hash(&buffer)?,
            });
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    /// Summary of the sync state of a workspace.
    pub fn status(&self, workspace_id: WorkspaceId) -> Result<SyncStatus, SyncError> {
        let Some(config) = self.db.get_git_sync_config(workspace_id)? else {
            return Ok(SyncStatus {
                state: SyncState::Unconfigured,
                repository: None,
                last_commit_id: None,
                last_commit_date: None,
                tracked: 0,
                pending_additions: 0,
                pending_updates: 0,
                pending_deletions: 0,
                pending_conflicts: 0,
            });
        };

        let state = match self.workspace_lock(workspace_id).try_lock() {
            Ok(_) => SyncState::Configured,
            Err(_) => SyncState::Committing,
        };
        let records = self.reconcile(&config)?;
        let pending_conflicts = self
            .db
            .list_conflicts(workspace_id, Some(ConflictStatus::Pending))?
            .len();

        Ok(SyncStatus {
            state,
            repository: Some(format!(
                "{}@{}",
                config.provider.repository, config.provider.branch
            )),
            last_commit_id: config.last_commit_id,
            last_commit_date: config.last_commit_date,
            tracked: records.iter().filter(|r| !r.synced_hash.is_empty()).count(),
            pending_additions: records.iter().filter(|r| r.is_addition()).count(),
            pending_updates: records
                .iter()
                .filter(|r| r.is_divergent() && !r.is_addition() && !r.is_deletion())
                .count(),
            pending_deletions: records
                .iter()
                .filter(|r| r.is_deletion() && !r.synced_hash.is_empty())
                .count(),
            pending_conflicts,
        })
    }

    /// Pending conflicts of a workspace, oldest first.
    pub fn pending_conflicts(&self, workspace_id: WorkspaceId) -> Result<Vec<Conflict>, SyncError> {
        Ok(self
            .db
            .list_conflicts(workspace_id, Some(ConflictStatus::Pending))?)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Commit every divergent unit as one commit.
    pub async fn commit(
        &self,
        workspace_id: WorkspaceId,
        message: &str,
        provider: &dyn GitProvider,
    ) -> Result<CommitOutcome, SyncError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        let config = self.load_config(workspace_id)?;
        let transformer = Transformer::from(config.provider.transformer);
        let records = self.reconcile(&config)?;
        let (deletions, updates): (Vec<&SyncRecord>, Vec<&SyncRecord>) = records
            .iter()
            .filter(|r| r.is_divergent())
            .partition(|r| r.is_deletion());
        if updates.is_empty() && deletions.is_empty() {
            debug!(%workspace_id, "nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        info!(
            %workspace_id,
            updates = updates.len(),
            deletions = deletions.len(),
            "starting commit"
        );

        let mut outputs = Vec::with_capacity(updates.len());
        let mut hashes = Vec::with_capacity(updates.len());
        for record in &updates {
            let buffer = self
                .db
                .get_content_buffer(&record.unit)?
                .ok_or_else(|| SyncError::UnknownContent(record.unit.clone()))?;
            let piece = self
                .db
                .get_content_piece(record.unit.piece)?
                .ok_or_else(|| SyncError::UnknownContent(record.unit.clone()))?;
            let variant_key = match record.unit.variant {
                Some(id) => self.db.get_variant(id)?.map(|v| v.key),
                None => None,
            };
            hashes.push(canonical_hash(&buffer)?);
            outputs.push(OutputContent {
                buffer,
                context: ContentPieceContext {
                    metadata: piece.metadata,
                    variant_key,
                },
            });
        }
        let texts = OutputContentProcessor::process_batch(&transformer, &outputs).await?;

        let request = CommitRequest {
            message: message.to_string(),
            expected_head: config.last_commit_id.clone(),
            additions: updates
                .iter()
                .zip(texts)
                .map(|(record, text)| FileAddition {
                    path: record.path.clone(),
                    text,
                })
                .collect(),
            deletions: deletions.iter().map(|r| r.path.clone()).collect(),
        };

        let result = match provider.commit(&request).await {
            Ok(result) => result,
            Err(e) => {
                self.audit(AuditEntry::failure(workspace_id, "commit", &e.to_string()));
                return Err(e.into());
            }
        };

        match result {
            CommitResult::Stale { remote_head } => {
                warn!(
                    %workspace_id,
                    expected = ?config.last_commit_id,
                    %remote_head,
                    "branch moved since last sync, commit refused"
                );
                self.audit(AuditEntry::failure(
                    workspace_id,
                    "commit",
                    &format!("stale: branch is at {remote_head}"),
                ));
                Ok(CommitOutcome::Stale {
                    expected: config.last_commit_id,
                    remote_head,
                })
            }
            CommitResult::Committed {
                commit_id,
                commit_date,
            } => {
                let label = format!("commit {}", short_id(&commit_id));
                let snapshots = updates
                    .iter()
                    .zip(&outputs)
                    .map(|(record, output)| {
                        new_snapshot(workspace_id, &record.unit, &output.buffer, Some(&label))
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                self.db.transaction(|conn| {
                    for ((record, hash), output) in updates.iter().zip(&hashes).zip(&outputs) {
                        // The body may have been saved again while the provider was busy.
                        let current = match get_content_buffer_tx(conn, &record.unit)? {
                            Some(stored) if stored != output.buffer => stored_hash(&stored),
                            _ => hash.clone(),
                        };
                        mark_committed_tx(conn, workspace_id, record, hash, &current)?;
                    }
                    for record in &deletions {
                        delete_sync_record_tx(conn, workspace_id, &record.unit)?;
                    }
                    update_last_commit_tx(conn, workspace_id, &commit_id, commit_date)?;
                    for snapshot in &snapshots {
                        insert_snapshot_tx(conn, snapshot)?;
                    }
                    Ok(())
                })?;

                let details = format!(
                    "{}: {} written, {} removed",
                    short_id(&commit_id),
                    updates.len(),
                    deletions.len()
                );
                info!(%workspace_id, %commit_id, %details, "commit complete");
                self.audit(AuditEntry::success(workspace_id, "commit", &details));
                Ok(CommitOutcome::Committed {
                    commit_id,
                    commit_date,
                    additions: updates.len(),
                    deletions: deletions.len(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Bring repository changes into the workspace.
    ///
    /// Either every change is applied in one transaction, or (when any unit
    /// conflicts) nothing is applied and the conflicts are persisted.
    pub async fn pull(
        &self,
        workspace_id: WorkspaceId,
        provider: &dyn GitProvider,
    ) -> Result<PullOutcome, SyncError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        let config = self.load_config(workspace_id)?;
        let transformer = Transformer::from(config.provider.transformer);
        let base = normalize_path(&config.provider.base_directory);

        let head = provider.head().await?;
        let remote = provider.fetch_files(&head.commit_id, &base).await?;

        let mut paths = Vec::new();
        let mut texts = Vec::new();
        for file in remote {
            let path = normalize_path(&file.path);
            let Some(relative) = strip_base(&path, &base) else {
                continue;
            };
            if !transformer.accepts(&path) || !self.path_rules.matches(relative) {
                continue;
            }
            paths.push(path);
            texts.push(file.text);
        }
        debug!(%workspace_id, files = paths.len(), commit = %head.commit_id, "fetched repository files");

        let contents = InputContentProcessor::process_batch(&transformer, &texts).await?;
        let files: Vec<IncomingFile> = paths
            .into_iter()
            .zip(texts)
            .zip(contents)
            .map(|((path, text), content)| IncomingFile {
                path,
                text,
                content,
            })
            .collect();

        let records = self.reconcile(&config)?;
        let plan = InboundDetector::plan(&records, &files);

        if plan.has_conflicts() {
            let reports = plan
                .conflicts()
                .map(|change| self.conflict_report(workspace_id, change))
                .collect::<Result<Vec<_>, _>>()?;
            let conflicts: Vec<Conflict> = reports.iter().map(|r| r.conflict.clone()).collect();
            self.db.replace_pending_conflicts(workspace_id, &conflicts)?;

            warn!(%workspace_id, conflicts = conflicts.len(), "pull blocked by conflicts");
            self.audit(AuditEntry::failure(
                workspace_id,
                "pull",
                &format!("{} conflicts at {}", conflicts.len(), short_id(&head.commit_id)),
            ));
            return Ok(PullOutcome::Conflicts(reports));
        }

        let variants = self.db.list_variants(workspace_id)?;
        let creations = plan_creations(&config, &records, &plan.unmatched, &variants);

        let nothing_changed = creations.pieces.is_empty()
            && creations.variants.is_empty()
            && plan.changes.iter().all(|c| c.action == InboundAction::Skip);
        if nothing_changed && config.last_commit_id.as_deref() == Some(head.commit_id.as_str()) {
            debug!(%workspace_id, "already up to date");
            return Ok(PullOutcome::UpToDate);
        }

        let summary = self.apply_inbound(workspace_id, &head, &plan.changes, &creations)?;
        self.db.clear_pending_conflicts(workspace_id)?;

        let details = format!(
            "{}: {} applied, {} created, {} deleted, {} converged, {} skipped",
            short_id(&summary.commit_id),
            summary.applied,
            summary.created,
            summary.deleted,
            summary.converged,
            summary.skipped.len()
        );
        info!(%workspace_id, %details, "pull complete");
        self.audit(AuditEntry::success(workspace_id, "pull", &details));
        Ok(PullOutcome::Applied(summary))
    }

    fn conflict_report(
        &self,
        workspace_id: WorkspaceId,
        change: &PlannedChange<'_>,
    ) -> Result<ConflictReport, SyncError> {
        let record = change.record;
        let kind = match change.action {
            InboundAction::Conflict(kind) => kind,
            _ => ConflictKind::Content,
        };
        let local = match self.db.get_content_buffer(&record.unit)? {
            Some(buffer) if !record.is_deletion() => decode(&buffer)?,
            _ => Node::doc(Vec::new()),
        };
        let incoming = match change.file {
            Some(file) => decode(&file.content.buffer)?,
            None => Node::doc(Vec::new()),
        };

        let conflict = Conflict {
            id: ConflictId::new(),
            workspace_id,
            unit: record.unit.clone(),
            path: change.file.map_or_else(|| record.path.clone(), |f| f.path.clone()),
            kind,
            incoming_text: change.file.map(|f| f.text.clone()),
            incoming_hash: change.file.map(|f| f.content.content_hash.clone()),
            synced_hash: record.synced_hash.clone(),
            current_hash: record.current_hash.clone(),
            status: ConflictStatus::Pending,
            created_at: Utc::now(),
        };
        debug!(unit = %conflict.unit, path = %conflict.path, %kind, "conflict detected");
        Ok(ConflictReport {
            conflict,
            diff: diff(&local, &incoming),
        })
    }

    fn apply_inbound(
        &self,
        workspace_id: WorkspaceId,
        head: &RemoteHead,
        changes: &[PlannedChange<'_>],
        creations: &Creations<'_>,
    ) -> Result<PullSummary, SyncError> {
        let label = format!("pull {}", short_id(&head.commit_id));
        let mut summary = PullSummary {
            commit_id: head.commit_id.clone(),
            skipped: creations.skipped.clone(),
            ..PullSummary::default()
        };

        let mut snapshots: Vec<DocumentSnapshot> = Vec::new();
        for change in changes {
            if let (InboundAction::Apply, Some(file)) = (change.action, change.file) {
                snapshots.push(new_snapshot(
                    workspace_id,
                    &change.record.unit,
                    &file.content.buffer,
                    Some(&label),
                )?);
            }
        }
        for (piece, file) in &creations.pieces {
            snapshots.push(new_snapshot(
                workspace_id,
                &ContentUnit::piece(piece.id),
                &file.content.buffer,
                Some(&label),
            )?);
        }
        for (unit, file) in &creations.variants {
            snapshots.push(new_snapshot(
                workspace_id,
                unit,
                &file.content.buffer,
                Some(&label),
            )?);
        }

        self.db.transaction(|conn| {
            for change in changes {
                let record = change.record;
                match (change.action, change.file) {
                    (InboundAction::Apply, Some(file)) => {
                        set_content_buffer_tx(conn, &record.unit, &file.content.buffer)?;
                        if record.unit.variant.is_none() {
                            update_metadata_tx(conn, record.unit.piece, &file.content.metadata)?;
                        }
                        upsert_sync_record_tx(conn, workspace_id, &in_sync(&record.unit, file))?;
                        summary.applied += 1;
                    }
                    (InboundAction::Converged, Some(file)) => {
                        upsert_sync_record_tx(conn, workspace_id, &in_sync(&record.unit, file))?;
                        summary.converged += 1;
                    }
                    (InboundAction::Delete, _) => {
                        delete_content_unit_tx(conn, &record.unit)?;
                        delete_sync_record_tx(conn, workspace_id, &record.unit)?;
                        summary.deleted += 1;
                    }
                    _ => {}
                }
            }
            for (piece, file) in &creations.pieces {
                let unit = ContentUnit::piece(piece.id);
                insert_content_piece_tx(conn, piece)?;
                set_content_buffer_tx(conn, &unit, &file.content.buffer)?;
                upsert_sync_record_tx(conn, workspace_id, &in_sync(&unit, file))?;
                summary.created += 1;
            }
            for (unit, file) in &creations.variants {
                set_content_buffer_tx(conn, unit, &file.content.buffer)?;
                upsert_sync_record_tx(conn, workspace_id, &in_sync(unit, file))?;
                summary.created += 1;
            }
            update_last_commit_tx(conn, workspace_id, &head.commit_id, head.commit_date)?;
            for snapshot in &snapshots {
                insert_snapshot_tx(conn, snapshot)?;
            }
            Ok(())
        })?;

        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------------

    /// Replace the content of `unit` with `incoming_text` and mark it synced.
    ///
    /// `expected_synced_hash` is the synced hash the caller resolved against;
    /// when the record has moved since, the resolution is refused with
    /// [`SyncError::Conflict`]. Returns the new content hash.
    pub async fn resolve_conflict(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
        incoming_text: &str,
        expected_synced_hash: &str,
        path: &str,
    ) -> Result<String, SyncError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        let config = self.load_config(workspace_id)?;
        let transformer = Transformer::from(config.provider.transformer);
        let record = self.db.get_sync_record(workspace_id, unit)?;
        self.check_synced_hash(unit, record.as_ref(), expected_synced_hash)?;

        if self.db.get_content_piece(unit.piece)?.is_none() {
            return Err(SyncError::UnknownContent(unit.clone()));
        }
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(SyncError::InvalidPath {
                path,
                detail: "path is empty".into(),
            });
        }
        let key = match_key(&path);
        if config
            .records
            .iter()
            .any(|r| r.unit != *unit && match_key(&r.path) == key)
        {
            return Err(SyncError::InvalidPath {
                path,
                detail: "path is tracked by another unit".into(),
            });
        }

        let input = InputContentProcessor::process(&transformer, incoming_text).await?;
        let snapshot = new_snapshot(workspace_id, unit, &input.buffer, Some("resolved"))?;
        let synced = SyncRecord {
            unit: unit.clone(),
            path,
            synced_hash: input.content_hash.clone(),
            current_hash: input.content_hash.clone(),
        };
        self.db.transaction(|conn| {
            set_content_buffer_tx(conn, unit, &input.buffer)?;
            if unit.variant.is_none() {
                update_metadata_tx(conn, unit.piece, &input.metadata)?;
            }
            upsert_sync_record_tx(conn, workspace_id, &synced)?;
            insert_snapshot_tx(conn, &snapshot)?;
            Ok(())
        })?;
        let resolved = self.db.resolve_conflicts_for_unit(workspace_id, unit)?;

        info!(%workspace_id, %unit, path = %synced.path, resolved, "conflict resolved with incoming content");
        self.audit(AuditEntry::success(
            workspace_id,
            "resolve",
            &format!("{} accepted incoming", synced.path),
        ));
        Ok(input.content_hash)
    }

    /// Apply `resolution` to a persisted conflict.
    pub async fn resolve_pending(
        &self,
        workspace_id: WorkspaceId,
        conflict_id: ConflictId,
        resolution: Resolution,
    ) -> Result<(), SyncError> {
        let conflict = self
            .db
            .get_conflict(conflict_id)?
            .filter(|c| c.workspace_id == workspace_id)
            .ok_or(SyncError::UnknownConflict(conflict_id))?;
        if conflict.status == ConflictStatus::Resolved {
            debug!(%conflict_id, "conflict already resolved");
            return Ok(());
        }

        if let (Resolution::AcceptIncoming, Some(text)) =
            (resolution, conflict.incoming_text.as_deref())
        {
            self.resolve_conflict(
                workspace_id,
                &conflict.unit,
                text,
                &conflict.synced_hash,
                &conflict.path,
            )
            .await?;
            return Ok(());
        }

        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        let record = self.db.get_sync_record(workspace_id, &conflict.unit)?;
        self.check_synced_hash(&conflict.unit, record.as_ref(), &conflict.synced_hash)?;
        let unit = &conflict.unit;

        match resolution {
            Resolution::AcceptIncoming => {
                // The file was deleted remotely.
                self.db.transaction(|conn| {
                    delete_content_unit_tx(conn, unit)?;
                    delete_sync_record_tx(conn, workspace_id, unit)?;
                    Ok(())
                })?;
            }
            Resolution::KeepLocal => {
                let synced_hash = conflict.incoming_hash.clone().unwrap_or_default();
                match record {
                    Some(record) if synced_hash.is_empty() && record.current_hash.is_empty() => {
                        self.db.delete_sync_record(workspace_id, unit)?;
                    }
                    Some(record) => {
                        self.db.transaction(|conn| {
                            mark_committed_tx(
                                conn,
                                workspace_id,
                                &record,
                                &synced_hash,
                                &record.current_hash,
                            )
                        })?;
                    }
                    None => {}
                }
            }
        }
        self.db.resolve_conflicts_for_unit(workspace_id, unit)?;

        info!(%workspace_id, %unit, %resolution, "conflict resolved");
        self.audit(AuditEntry::success(
            workspace_id,
            "resolve",
            &format!("{} {}", conflict.path, resolution),
        ));
        Ok(())
    }

    fn check_synced_hash(
        &self,
        unit: &ContentUnit,
        record: Option<&SyncRecord>,
        expected: &str,
    ) -> Result<(), SyncError> {
        let actual = record.map(|r| r.synced_hash.as_str()).unwrap_or_default();
        if actual != expected {
            return Err(SyncError::Conflict {
                unit: unit.clone(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Path derivation and inbound creation
// ---------------------------------------------------------------------------

fn short_id(commit_id: &str) -> &str {
    commit_id.get(..7).unwrap_or(commit_id)
}

/// Content hash of a stored body. A body that does not decode hashes as
/// raw bytes, so it stays divergent and the next commit reports it.
fn stored_hash(buffer: &[u8]) -> String {
    canonical_hash(buffer).unwrap_or_else(|_| hash_buffer(buffer))
}

fn in_sync(unit: &ContentUnit, file: &IncomingFile) -> SyncRecord {
    SyncRecord {
        unit: unit.clone(),
        path: file.path.clone(),
        synced_hash: file.content.content_hash.clone(),
        current_hash: file.content.content_hash.clone(),
    }
}

/// Repository path for an untracked unit, unique among `taken`.
///
/// `<base>/<directory>/[<variant>/]<stem>.<ext>`, or `<stem>.<variant>.<ext>`
/// when variant subdirectories are off. Collisions get a `-2`, `-3`...
/// suffix on the stem. `None` when the piece's group is not mapped.
fn derive_path(
    config: &GitSyncConfiguration,
    transformer: &Transformer,
    piece: &ContentPiece,
    variant_key: Option<&str>,
    taken: &mut HashSet<String>,
) -> Option<String> {
    let directory = config
        .directories
        .iter()
        .find(|d| d.content_group_id == piece.content_group_id)?;

    let stem = piece
        .filename
        .as_deref()
        .map(file_stem)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let source = piece
                .metadata
                .slug
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(&piece.metadata.title);
            slugify(source)
        });

    let ext = transformer.extension();
    let (subdirectory, suffix) = match variant_key {
        Some(key) if config.provider.variant_subdirectories => (key, format!(".{ext}")),
        Some(key) => ("", format!(".{key}.{ext}")),
        None => ("", format!(".{ext}")),
    };
    let parent = join([
        config.provider.base_directory.as_str(),
        directory.path.as_str(),
        subdirectory,
    ]);

    let mut candidate = join([parent.as_str(), format!("{stem}{suffix}").as_str()]);
    let mut n = 2;
    while taken.contains(&match_key(&candidate)) {
        candidate = join([parent.as_str(), format!("{stem}-{n}{suffix}").as_str()]);
        n += 1;
    }
    taken.insert(match_key(&candidate));
    Some(candidate)
}

/// Units to create for repository files with no record.
struct Creations<'a> {
    pieces: Vec<(ContentPiece, &'a IncomingFile)>,
    variants: Vec<(ContentUnit, &'a IncomingFile)>,
    skipped: Vec<String>,
}

/// Split `remainder` (a path below a mapped directory) into the variant it
/// belongs to and the remainder of the corresponding base file.
fn split_variant<'v>(
    remainder: &str,
    variants: &'v [Variant],
    subdirectories: bool,
) -> (Option<&'v Variant>, String) {
    let find = |key: &str| variants.iter().find(|v| v.key == key);
    if subdirectories {
        if let Some((first, rest)) = remainder.split_once('/') {
            if let Some(variant) = find(first) {
                return (Some(variant), rest.to_string());
            }
        }
        return (None, remainder.to_string());
    }

    let (parent, name) = match remainder.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", remainder),
    };
    let stem = file_stem(name);
    let ext = &name[stem.len()..];
    if let Some((base_stem, key)) = stem.rsplit_once('.') {
        if let Some(variant) = find(key) {
            let base_name = format!("{base_stem}{ext}");
            return (Some(variant), join([parent, base_name.as_str()]));
        }
    }
    (None, remainder.to_string())
}

/// Infer content pieces and variant units for unmatched files from the
/// directory mappings. Base files are placed before variants so a variant
/// can attach to a piece created in the same pull.
fn plan_creations<'a>(
    config: &GitSyncConfiguration,
    records: &[SyncRecord],
    unmatched: &[&'a IncomingFile],
    variants: &[Variant],
) -> Creations<'a> {
    let base = normalize_path(&config.provider.base_directory);
    let subdirectories = config.provider.variant_subdirectories;

    let mut pieces_by_path: HashMap<String, ContentPieceId> = records
        .iter()
        .filter(|r| r.unit.variant.is_none())
        .map(|r| (match_key(&r.path), r.unit.piece))
        .collect();

    struct Located<'f, 'd> {
        file: &'f IncomingFile,
        directory: &'d Directory,
        variant: Option<VariantId>,
        base_path: String,
        name: String,
    }

    let mut creations = Creations {
        pieces: Vec::new(),
        variants: Vec::new(),
        skipped: Vec::new(),
    };
    let mut located = Vec::new();
    for &file in unmatched {
        let relative = strip_base(&file.path, &base).unwrap_or(&file.path);
        let Some(directory) = directory_for(relative, &config.directories) else {
            debug!(path = %file.path, "no directory mapping, skipping");
            creations.skipped.push(file.path.clone());
            continue;
        };
        let dir_path = normalize_path(&directory.path);
        let remainder = strip_base(relative, &dir_path).unwrap_or(relative);
        let (variant, base_remainder) = split_variant(remainder, variants, subdirectories);
        let name = base_remainder
            .rsplit('/')
            .next()
            .unwrap_or(&base_remainder)
            .to_string();
        located.push(Located {
            file,
            directory,
            variant: variant.map(|v| v.id),
            base_path: join([base.as_str(), dir_path.as_str(), base_remainder.as_str()]),
            name,
        });
    }
    located.sort_by_key(|l| l.variant.is_some());

    let now = Utc::now();
    for entry in located {
        match entry.variant {
            None => {
                let piece = ContentPiece {
                    id: ContentPieceId::new(),
                    workspace_id: config.workspace_id,
                    content_group_id: entry.directory.content_group_id,
                    filename: Some(entry.name),
                    metadata: entry.file.content.metadata.clone(),
                    created_at: now,
                    updated_at: now,
                };
                debug!(path = %entry.file.path, piece = %piece.id, "new content piece from repository");
                pieces_by_path.insert(match_key(&entry.file.path), piece.id);
                creations.pieces.push((piece, entry.file));
            }
            Some(variant) => match pieces_by_path.get(&match_key(&entry.base_path)) {
                Some(&piece) => {
                    let unit = ContentUnit::new(piece, Some(variant));
                    debug!(path = %entry.file.path, %unit, "new variant from repository");
                    creations.variants.push((unit, entry.file));
                }
                None => {
                    debug!(path = %entry.file.path, base = %entry.base_path, "variant without base file, skipping");
                    creations.skipped.push(entry.file.path.clone());
                }
            },
        }
    }
    creations
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::document::encode;
    use crate::errors::GitHubError;
    use crate::git::provider::RemoteFile;
    use crate::ids::ContentGroupId;
    use crate::models::{ContentMetadata, ProviderKind, TransformerKind};

    #[derive(Default)]
    struct FakeState {
        head: u32,
        files: HashMap<String, String>,
        commits: Vec<CommitRequest>,
    }

    #[derive(Default)]
    struct FakeProvider {
        state: Mutex<FakeState>,
    }

    impl FakeProvider {
        fn head_id(state: &FakeState) -> String {
            format!("{:07}", state.head)
        }

        fn push_external(&self, path: &str, text: &str) {
            let mut state = self.state.lock().unwrap();
            state.files.insert(path.into(), text.into());
            state.head += 1;
        }

        fn file(&self, path: &str) -> Option<String> {
            self.state.lock().unwrap().files.get(path).cloned()
        }
    }

    #[async_trait]
    impl GitProvider for FakeProvider {
        async fn head(&self) -> Result<RemoteHead, GitHubError> {
            let state = self.state.lock().unwrap();
            Ok(RemoteHead {
                commit_id: Self::head_id(&state),
                commit_date: Utc::now(),
            })
        }

        async fn fetch_files(&self, _: &str, directory: &str) -> Result<Vec<RemoteFile>, GitHubError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .files
                .iter()
                .filter(|(p, _)| strip_base(p, directory).is_some())
                .map(|(p, t)| RemoteFile {
                    path: p.clone(),
                    text: t.clone(),
                })
                .collect())
        }

        async fn commit(&self, request: &CommitRequest) -> Result<CommitResult, GitHubError> {
            let mut state = self.state.lock().unwrap();
            let head = Self::head_id(&state);
            if request.expected_head.as_deref() != Some(head.as_str()) {
                return Ok(CommitResult::Stale { remote_head: head });
            }
            for add in &request.additions {
                state.files.insert(add.path.clone(), add.text.clone());
            }
            for path in &request.deletions {
                state.files.remove(path);
            }
            state.commits.push(request.clone());
            state.head += 1;
            Ok(CommitResult::Committed {
                commit_id: Self::head_id(&state),
                commit_date: Utc::now(),
            })
        }
    }

    struct Fixture {
        sync: GitSync,
        db: Arc<Database>,
        provider: FakeProvider,
        ws: WorkspaceId,
        group: ContentGroupId,
    }

    fn para_doc(text: &str) -> Vec<u8> {
        encode(&Node::doc(vec![Node::paragraph(vec![Node::text(text)])]))
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let ws = WorkspaceId::new();
        let group = db.create_content_group(ws, "Docs").unwrap().id;
        let sync = GitSync::new(db.clone());
        let provider = FakeProvider::default();
        sync.configure(
            ws,
            ProviderConfig {
                kind: ProviderKind::GitHub,
                repository: "acme/docs".into(),
                branch: "main".into(),
                base_directory: String::new(),
                transformer: TransformerKind::Markdown,
                variant_subdirectories: true,
            },
            vec![Directory {
                path: "/docs/".into(),
                content_group_id: group,
            }],
            &provider,
        )
        .await
        .unwrap();
        Fixture {
            sync,
            db,
            provider,
            ws,
            group,
        }
    }

    fn metadata(title: &str) -> ContentMetadata {
        ContentMetadata {
            title: title.into(),
            ..ContentMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_configure_twice_fails() {
        let f = fixture().await;
        let err = f
            .sync
            .configure(
                f.ws,
                f.sync.configuration(f.ws).unwrap().unwrap().provider,
                vec![],
                &f.provider,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyConfigured(_)));
        let config = f.sync.configuration(f.ws).unwrap().unwrap();
        assert_eq!(config.directories[0].path, "docs");
        assert_eq!(config.last_commit_id.as_deref(), Some("0000000"));
    }

    #[tokio::test]
    async fn test_untracked_units_become_pending_additions() {
        let f = fixture().await;
        f.db
            .create_content_piece(f.ws, f.group, metadata("Hello World"), None, &para_doc("a"))
            .unwrap();
        f.db
            .create_content_piece(f.ws, f.group, metadata("Hello World"), None, &para_doc("b"))
            .unwrap();

        let records = f.sync.get_records(f.ws).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/hello-world-2.md", "docs/hello-world.md"]);
        assert!(records.iter().all(|r| r.is_addition()));
    }

    #[tokio::test]
    async fn test_commit_then_edit_then_commit() {
        let f = fixture().await;
        let piece = f
            .db
            .create_content_piece(f.ws, f.group, metadata("Intro"), Some("intro.md".into()), &para_doc("one"))
            .unwrap();
        let unit = ContentUnit::piece(piece.id);

        let first = f.sync.commit(f.ws, "add intro", &f.provider).await.unwrap();
        assert!(matches!(first, CommitOutcome::Committed { additions: 1, deletions: 0, .. }));
        assert!(f.provider.file("docs/intro.md").unwrap().contains("one"));

        f.db.set_content_buffer(&unit, &para_doc("two")).unwrap();
        let hash = canonical_hash(&para_doc("two")).unwrap();
        f.sync.tracker().record_local_change(f.ws, &unit, &hash).unwrap();

        let second = f.sync.commit(f.ws, "edit intro", &f.provider).await.unwrap();
        assert!(matches!(second, CommitOutcome::Committed { additions: 1, .. }));
        let record = f.db.get_sync_record(f.ws, &unit).unwrap().unwrap();
        assert_eq!(record.synced_hash, hash);
        assert!(!record.is_divergent());
        assert_eq!(
            f.sync.commit(f.ws, "noop", &f.provider).await.unwrap(),
            CommitOutcome::NothingToCommit
        );
    }

    /// Saves a new body for `unit` while the commit is in flight.
    struct EditingProvider<'a> {
        inner: &'a FakeProvider,
        sync: &'a GitSync,
        ws: WorkspaceId,
        unit: ContentUnit,
        buffer: Vec<u8>,
    }

    #[async_trait]
    impl GitProvider for EditingProvider<'_> {
        async fn head(&self) -> Result<RemoteHead, GitHubError> {
            self.inner.head().await
        }

        async fn fetch_files(&self, commit_id: &str, directory: &str) -> Result<Vec<RemoteFile>, GitHubError> {
            self.inner.fetch_files(commit_id, directory).await
        }

        async fn commit(&self, request: &CommitRequest) -> Result<CommitResult, GitHubError> {
            self.sync.db.set_content_buffer(&self.unit, &self.buffer).unwrap();
            let hash = canonical_hash(&self.buffer).unwrap();
            self.sync
                .tracker()
                .record_local_change(self.ws, &self.unit, &hash)
                .unwrap();
            self.inner.commit(request).await
        }
    }

    #[tokio::test]
    async fn test_edit_during_first_commit_stays_divergent() {
        let f = fixture().await;
        let piece = f
            .db
            .create_content_piece(f.ws, f.group, metadata("Draft"), None, &para_doc("v1"))
            .unwrap();
        let unit = ContentUnit::piece(piece.id);
        let editing = EditingProvider {
            inner: &f.provider,
            sync: &f.sync,
            ws: f.ws,
            unit: unit.clone(),
            buffer: para_doc("v2"),
        };

        let first = f.sync.commit(f.ws, "add draft", &editing).await.unwrap();
        assert!(matches!(first, CommitOutcome::Committed { additions: 1, .. }));
        let record = f.db.get_sync_record(f.ws, &unit).unwrap().unwrap();
        assert_eq!(record.synced_hash, canonical_hash(&para_doc("v1")).unwrap());
        assert_eq!(record.current_hash, canonical_hash(&para_doc("v2")).unwrap());
        assert_eq!(f.sync.tracker().divergent_units(f.ws).unwrap().len(), 1);

        let second = f.sync.commit(f.ws, "edit draft", &f.provider).await.unwrap();
        assert!(matches!(second, CommitOutcome::Committed { additions: 1, .. }));
        let text = f.provider.file(&record.path).unwrap();
        assert!(text.ends_with("v2\n"), "{text}");
        assert!(f.sync.tracker().divergent_units(f.ws).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_commit_changes_nothing() {
        let f = fixture().await;
        let piece = f
            .db
            .create_content_piece(f.ws, f.group, metadata("Intro"), None, &para_doc("one"))
            .unwrap();
        f.provider.push_external("README.md", "# Readme\n");

        let before = f.sync.configuration(f.ws).unwrap().unwrap();
        let outcome = f.sync.commit(f.ws, "add", &f.provider).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Stale { .. }));

        let after = f.sync.configuration(f.ws).unwrap().unwrap();
        assert_eq!(before.last_commit_id, after.last_commit_id);
        assert!(after.records.is_empty());
        assert!(f.db.list_snapshots(&ContentUnit::piece(piece.id)).unwrap().is_empty());
        assert!(f.provider.state.lock().unwrap().commits.is_empty());
    }

    #[tokio::test]
    async fn test_pull_creates_piece_under_mapped_directory() {
        let f = fixture().await;
        f.provider
            .push_external("docs/guide.md", "---\ntitle: Guide\n---\nRead me.\n");
        f.provider.push_external("other/skip.md", "Elsewhere.\n");

        let outcome = f.sync.pull(f.ws, &f.provider).await.unwrap();
        let PullOutcome::Applied(summary) = outcome else {
            panic!("expected applied pull");
        };
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, vec!["other/skip.md".to_string()]);

        let pieces = f.db.list_content_pieces(f.ws).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].content_group_id, f.group);
        assert_eq!(pieces[0].metadata.title, "Guide");
        assert_eq!(pieces[0].filename.as_deref(), Some("guide.md"));

        let records = f.sync.get_records(f.ws).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_divergent());
        assert!(matches!(
            f.sync.pull(f.ws, &f.provider).await.unwrap(),
            PullOutcome::UpToDate
        ));
    }

    #[tokio::test]
    async fn test_pull_conflict_blocks_everything() {
        let f = fixture().await;
        let piece = f
            .db
            .create_content_piece(f.ws, f.group, metadata("Intro"), Some("intro.md".into()), &para_doc("base"))
            .unwrap();
        let unit = ContentUnit::piece(piece.id);
        f.sync.commit(f.ws, "add", &f.provider).await.unwrap();

        f.db.set_content_buffer(&unit, &para_doc("local")).unwrap();
        let local_hash = canonical_hash(&para_doc("local")).unwrap();
        f.sync.tracker().record_local_change(f.ws, &unit, &local_hash).unwrap();
        f.provider.push_external("docs/intro.md", "---\ntitle: Intro\n---\nremote\n");
        f.provider.push_external("docs/new.md", "New.\n");

        let outcome = f.sync.pull(f.ws, &f.provider).await.unwrap();
        let PullOutcome::Conflicts(reports) = outcome else {
            panic!("expected conflicts");
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].conflict.kind, ConflictKind::Content);
        assert!(reports[0].diff.has_changes());
        assert_eq!(f.db.list_content_pieces(f.ws).unwrap().len(), 1);
        assert_eq!(f.sync.pending_conflicts(f.ws).unwrap().len(), 1);

        let conflict_id = reports[0].conflict.id;
        f.sync
            .resolve_pending(f.ws, conflict_id, Resolution::KeepLocal)
            .await
            .unwrap();
        let record = f.db.get_sync_record(f.ws, &unit).unwrap().unwrap();
        assert_eq!(record.synced_hash, reports[0].conflict.incoming_hash.clone().unwrap());
        assert_eq!(record.current_hash, local_hash);
        assert!(f.sync.pending_conflicts(f.ws).unwrap().is_empty());

        let PullOutcome::Applied(summary) = f.sync.pull(f.ws, &f.provider).await.unwrap() else {
            panic!("expected applied pull");
        };
        assert_eq!(summary.created, 1);
        assert_eq!(
            f.db.get_content_buffer(&unit).unwrap().unwrap(),
            para_doc("local")
        );
    }

    #[tokio::test]
    async fn test_resolve_conflict_checks_synced_hash() {
        let f = fixture().await;
        let piece = f
            .db
            .create_content_piece(f.ws, f.group, metadata("Intro"), Some("intro.md".into()), &para_doc("base"))
            .unwrap();
        let unit = ContentUnit::piece(piece.id);
        f.sync.commit(f.ws, "add", &f.provider).await.unwrap();
        let synced = f.db.get_sync_record(f.ws, &unit).unwrap().unwrap().synced_hash;

        let err = f
            .sync
            .resolve_conflict(f.ws, &unit, "Merged.\n", "bogus", "docs/intro.md")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));

        let hash = f
            .sync
            .resolve_conflict(f.ws, &unit, "Merged.\n", &synced, "docs/intro.md")
            .await
            .unwrap();
        assert_eq!(hash, canonical_hash(&para_doc("Merged.")).unwrap());
        let record = f.db.get_sync_record(f.ws, &unit).unwrap().unwrap();
        assert_eq!(record.synced_hash, hash);
        assert_eq!(record.current_hash, hash);
    }

    #[tokio::test]
    async fn test_local_deletion_is_committed() {
        let f = fixture().await;
        let piece = f
            .db
            .create_content_piece(f.ws, f.group, metadata("Gone"), None, &para_doc("bye"))
            .unwrap();
        let unit = ContentUnit::piece(piece.id);
        f.sync.commit(f.ws, "add", &f.provider).await.unwrap();
        assert!(f.provider.file("docs/gone.md").is_some());

        f.db.delete_content_unit(&unit).unwrap();
        f.sync.tracker().record_deletion(f.ws, &unit).unwrap();
        let outcome = f.sync.commit(f.ws, "remove", &f.provider).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { deletions: 1, .. }));
        assert!(f.provider.file("docs/gone.md").is_none());
        assert!(f.sync.get_records(f.ws).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_and_status() {
        let f = fixture().await;
        f.db
            .create_content_piece(f.ws, f.group, metadata("Intro"), None, &para_doc("x"))
            .unwrap();
        let status = f.sync.status(f.ws).unwrap();
        assert_eq!(status.state, SyncState::Configured);
        assert_eq!(status.pending_additions, 1);

        f.sync.reset(f.ws).await.unwrap();
        assert_eq!(f.sync.status(f.ws).unwrap().state, SyncState::Unconfigured);
        assert!(matches!(
            f.sync.reset(f.ws).await.unwrap_err(),
            SyncError::NotConfigured(_)
        ));
        assert!(matches!(
            f.sync.get_records(f.ws).unwrap_err(),
            SyncError::NotConfigured(_)
        ));
    }

    #[test]
    fn test_split_variant() {
        let variants = vec![Variant {
            id: VariantId::new(),
            workspace_id: WorkspaceId::new(),
            key: "de".into(),
        }];
        let (v, rest) = split_variant("de/intro.md", &variants, true);
        assert_eq!(v.map(|v| v.key.as_str()), Some("de"));
        assert_eq!(rest, "intro.md");

        let (v, rest) = split_variant("guides/intro.de.md", &variants, false);
        assert!(v.is_some());
        assert_eq!(rest, "guides/intro.md");

        let (v, rest) = split_variant("intro.md", &variants, false);
        assert!(v.is_none());
        assert_eq!(rest, "intro.md");
    }
}
