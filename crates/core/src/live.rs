//! Live-editor persistence.
//!
//! Editors report "document changed" for a unit; the [`EditDebouncer`] keeps
//! one pending write per unit and replaces it on every new notification, so a
//! burst of edits produces a single write of the latest state. The write
//! stores the buffer and feeds the new hash to the [`ChangeTracker`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::Database;
use crate::errors::SyncError;
use crate::ids::{ContentUnit, WorkspaceId};
use crate::tracker::ChangeTracker;
use crate::transform::canonical_hash;

/// Where the current editor state of a unit lives.
#[async_trait]
pub trait LiveDocumentSource: Send + Sync {
    /// Current structured buffer of `unit`, `None` if the editor has none.
    async fn current_document(&self, unit: &ContentUnit) -> Option<Vec<u8>>;
}

/// A [`LiveDocumentSource`] backed by a map, for embedding and tests.
#[derive(Default)]
pub struct MemoryDocumentSource {
    documents: Mutex<HashMap<ContentUnit, Vec<u8>>>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, unit: &ContentUnit, buffer: Vec<u8>) {
        lock(&self.documents).insert(unit.clone(), buffer);
    }
}

#[async_trait]
impl LiveDocumentSource for MemoryDocumentSource {
    async fn current_document(&self, unit: &ContentUnit) -> Option<Vec<u8>> {
        lock(&self.documents).get(unit).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct PendingWrite {
    generation: u64,
    workspace_id: WorkspaceId,
    handle: JoinHandle<()>,
}

struct Inner {
    db: Arc<Database>,
    tracker: ChangeTracker,
    source: Arc<dyn LiveDocumentSource>,
    delay: Duration,
    generation: AtomicU64,
    pending: Mutex<HashMap<ContentUnit, PendingWrite>>,
    /// Serializes writes so an older pull can never land after a newer one.
    write_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    /// Remove the slot of `unit` if it still belongs to `generation`.
    fn claim(&self, unit: &ContentUnit, generation: u64) -> bool {
        let mut pending = lock(&self.pending);
        match pending.get(unit) {
            Some(slot) if slot.generation == generation => {
                pending.remove(unit);
                true
            }
            _ => false,
        }
    }

    async fn persist(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
    ) -> Result<Option<String>, SyncError> {
        let _guard = self.write_lock.lock().await;
        if self.db.get_content_piece(unit.piece)?.is_none() {
            debug!(%unit, "content piece deleted, dropping live write");
            return Ok(None);
        }
        let Some(buffer) = self.source.current_document(unit).await else {
            debug!(%unit, "no live document to persist");
            return Ok(None);
        };
        let hash = canonical_hash(&buffer)?;
        self.db.set_content_buffer(unit, &buffer)?;
        if self.db.has_git_sync_config(workspace_id)? {
            self.tracker.record_local_change(workspace_id, unit, &hash)?;
        }
        debug!(%unit, hash, "persisted live document");
        Ok(Some(hash))
    }
}

/// Per-unit single-slot debouncer of live-editor writes.
#[derive(Clone)]
pub struct EditDebouncer {
    inner: Arc<Inner>,
}

impl EditDebouncer {
    pub fn new(
        db: Arc<Database>,
        tracker: ChangeTracker,
        source: Arc<dyn LiveDocumentSource>,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                tracker,
                source,
                delay,
                generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Schedule a write of `unit`, replacing any pending one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn notify(&self, workspace_id: WorkspaceId, unit: ContentUnit) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        let task_unit = unit.clone();

        let mut pending = lock(&self.inner.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            if !inner.claim(&task_unit, generation) {
                return;
            }
            if let Err(e) = inner.persist(workspace_id, &task_unit).await {
                warn!(unit = %task_unit, error = %e, "failed to persist live document");
            }
        });
        let replaced = pending.insert(
            unit.clone(),
            PendingWrite {
                generation,
                workspace_id,
                handle,
            },
        );
        if let Some(old) = replaced {
            old.handle.abort();
            debug!(%unit, "superseded pending write");
        }
    }

    /// Drop the pending write of `unit` without writing. Returns whether one
    /// was pending.
    pub fn cancel(&self, unit: &ContentUnit) -> bool {
        match lock(&self.inner.pending).remove(unit) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Write `unit` now if a write is pending. Returns the new hash.
    pub async fn flush(&self, unit: &ContentUnit) -> Result<Option<String>, SyncError> {
        let slot = lock(&self.inner.pending).remove(unit);
        match slot {
            Some(slot) => {
                slot.handle.abort();
                self.inner.persist(slot.workspace_id, unit).await
            }
            None => Ok(None),
        }
    }

    /// Write every pending unit now.
    pub async fn flush_all(&self) -> Result<usize, SyncError> {
        let slots: Vec<(ContentUnit, PendingWrite)> =
            lock(&self.inner.pending).drain().collect();
        let count = slots.len();
        for (unit, slot) in slots {
            slot.handle.abort();
            self.inner.persist(slot.workspace_id, &unit).await?;
        }
        Ok(count)
    }

    /// Number of units with a pending write.
    pub fn pending(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}
