//! Typed query helpers for every table in the contentsync database.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::ids::{
    ConflictId, ContentGroupId, ContentPieceId, ContentUnit, SnapshotId, VariantId, WorkspaceId,
};
use crate::models::{
    AuditEntry, Conflict, ConflictKind, ConflictStatus, ContentGroup, ContentMetadata,
    ContentPiece, Directory, DocumentSnapshot, GitSyncConfiguration, ProviderConfig, SyncRecord,
    Variant,
};

/// Timestamps are stored as fixed-precision RFC 3339 so they sort as text.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn unit_from_row(row: &Row<'_>, piece_idx: usize, variant_idx: usize) -> rusqlite::Result<ContentUnit> {
    let piece: ContentPieceId = row.get(piece_idx)?;
    let variant: String = row.get(variant_idx)?;
    ContentUnit::from_keys(piece, &variant).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            variant_idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

const PIECE_COLUMNS: &str = "id, workspace_id, content_group_id, filename, title, description, slug,
     date, tags, authors, canonical_link, created_at, updated_at";

fn piece_from_row(row: &Row<'_>) -> rusqlite::Result<ContentPiece> {
    let date: Option<String> = row.get(7)?;
    let tags: String = row.get(8)?;
    let authors: String = row.get(9)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(ContentPiece {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        content_group_id: row.get(2)?,
        filename: row.get(3)?,
        metadata: ContentMetadata {
            title: row.get(4)?,
            description: row.get(5)?,
            slug: row.get(6)?,
            date: date.as_deref().and_then(parse_timestamp),
            tags: json_list(&tags),
            authors: json_list(&authors),
            canonical_link: row.get(10)?,
        },
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

const CONFLICT_COLUMNS: &str = "id, workspace_id, content_piece_id, variant_id, path, kind,
     incoming_text, incoming_hash, synced_hash, current_hash, status, created_at";

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    let kind: String = row.get(5)?;
    let status: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    Ok(Conflict {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        unit: unit_from_row(row, 2, 3)?,
        path: row.get(4)?,
        kind: ConflictKind::from_str_val(&kind),
        incoming_text: row.get(6)?,
        incoming_hash: row.get(7)?,
        synced_hash: row.get(8)?,
        current_hash: row.get(9)?,
        status: ConflictStatus::from_str_val(&status),
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
    })
}

const SNAPSHOT_COLUMNS: &str =
    "id, workspace_id, content_piece_id, variant_id, label, buffer, content_hash, created_at";

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentSnapshot> {
    let created_at: String = row.get(7)?;
    Ok(DocumentSnapshot {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        unit: unit_from_row(row, 2, 3)?,
        label: row.get(4)?,
        buffer: row.get(5)?,
        content_hash: row.get(6)?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    Ok(SyncRecord {
        unit: unit_from_row(row, 0, 1)?,
        path: row.get(2)?,
        synced_hash: row.get(3)?,
        current_hash: row.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Connection-level record helpers (usable inside transactions)
// ---------------------------------------------------------------------------

/// Insert or replace the record for `record.unit`.
pub fn upsert_sync_record_tx(
    conn: &Connection,
    workspace_id: WorkspaceId,
    record: &SyncRecord,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO git_sync_records
             (workspace_id, content_piece_id, variant_id, path, synced_hash, current_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (workspace_id, content_piece_id, variant_id) DO UPDATE SET
             path = excluded.path,
             synced_hash = excluded.synced_hash,
             current_hash = excluded.current_hash",
        params![
            workspace_id,
            record.unit.piece,
            record.unit.variant_key(),
            record.path,
            record.synced_hash,
            record.current_hash
        ],
    )?;
    Ok(())
}

/// Remove the record for `unit`. Returns whether a row was deleted.
pub fn delete_sync_record_tx(
    conn: &Connection,
    workspace_id: WorkspaceId,
    unit: &ContentUnit,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM git_sync_records
         WHERE workspace_id = ?1 AND content_piece_id = ?2 AND variant_id = ?3",
        params![workspace_id, unit.piece, unit.variant_key()],
    )?;
    Ok(changed > 0)
}

/// Store the structured buffer of `unit`.
pub fn set_content_buffer_tx(
    conn: &Connection,
    unit: &ContentUnit,
    buffer: &[u8],
) -> Result<(), DatabaseError> {
    let now = timestamp(Utc::now());
    conn.execute(
        "INSERT INTO contents (content_piece_id, variant_id, buffer, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (content_piece_id, variant_id) DO UPDATE SET
             buffer = excluded.buffer,
             updated_at = excluded.updated_at",
        params![unit.piece, unit.variant_key(), buffer, now],
    )?;
    Ok(())
}

/// Read the structured buffer of `unit`.
pub fn get_content_buffer_tx(
    conn: &Connection,
    unit: &ContentUnit,
) -> Result<Option<Vec<u8>>, DatabaseError> {
    let buffer = conn
        .query_row(
            "SELECT buffer FROM contents WHERE content_piece_id = ?1 AND variant_id = ?2",
            params![unit.piece, unit.variant_key()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(buffer)
}

/// Overwrite the metadata columns of a piece.
pub fn update_metadata_tx(
    conn: &Connection,
    piece: ContentPieceId,
    metadata: &ContentMetadata,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE content_pieces SET title = ?1, description = ?2, slug = ?3, date = ?4,
             tags = ?5, authors = ?6, canonical_link = ?7, updated_at = ?8
         WHERE id = ?9",
        params![
            metadata.title,
            metadata.description,
            metadata.slug,
            metadata.date.map(timestamp),
            serde_json::to_string(&metadata.tags)?,
            serde_json::to_string(&metadata.authors)?,
            metadata.canonical_link,
            timestamp(Utc::now()),
            piece
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "content_piece".into(),
            id: piece.to_string(),
        });
    }
    Ok(())
}

/// Insert a content piece row.
pub fn insert_content_piece_tx(conn: &Connection, piece: &ContentPiece) -> Result<(), DatabaseError> {
    let meta = &piece.metadata;
    conn.execute(
        "INSERT INTO content_pieces (id, workspace_id, content_group_id, filename, title,
             description, slug, date, tags, authors, canonical_link, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            piece.id,
            piece.workspace_id,
            piece.content_group_id,
            piece.filename,
            meta.title,
            meta.description,
            meta.slug,
            meta.date.map(timestamp),
            serde_json::to_string(&meta.tags)?,
            serde_json::to_string(&meta.authors)?,
            meta.canonical_link,
            timestamp(piece.created_at),
            timestamp(piece.updated_at)
        ],
    )?;
    Ok(())
}

/// Delete the stored body of `unit`; deleting the base unit removes the
/// whole piece (and, by cascade, its variant bodies).
pub fn delete_content_unit_tx(conn: &Connection, unit: &ContentUnit) -> Result<(), DatabaseError> {
    match unit.variant {
        Some(_) => {
            conn.execute(
                "DELETE FROM contents WHERE content_piece_id = ?1 AND variant_id = ?2",
                params![unit.piece, unit.variant_key()],
            )?;
        }
        None => {
            conn.execute("DELETE FROM content_pieces WHERE id = ?1", params![unit.piece])?;
        }
    }
    Ok(())
}

/// Record that `unit` is in sync at `hash` (both hashes set).
///
/// Returns `false` when the unit has no record.
pub fn mark_synced_tx(
    conn: &Connection,
    workspace_id: WorkspaceId,
    unit: &ContentUnit,
    hash: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE git_sync_records SET synced_hash = ?1, current_hash = ?1
         WHERE workspace_id = ?2 AND content_piece_id = ?3 AND variant_id = ?4",
        params![hash, workspace_id, unit.piece, unit.variant_key()],
    )?;
    Ok(changed > 0)
}

/// Record a committed unit: `synced_hash` is what the commit wrote.
///
/// A record that already exists keeps its `current_hash`, which the tracker
/// may have advanced while the commit was in flight. A new record takes
/// `current_hash` from the caller.
pub fn mark_committed_tx(
    conn: &Connection,
    workspace_id: WorkspaceId,
    record: &SyncRecord,
    synced_hash: &str,
    current_hash: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO git_sync_records
             (workspace_id, content_piece_id, variant_id, path, synced_hash, current_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (workspace_id, content_piece_id, variant_id) DO UPDATE SET
             path = excluded.path,
             synced_hash = excluded.synced_hash",
        params![
            workspace_id,
            record.unit.piece,
            record.unit.variant_key(),
            record.path,
            synced_hash,
            current_hash
        ],
    )?;
    Ok(())
}

/// Advance the last known commit of a workspace.
pub fn update_last_commit_tx(
    conn: &Connection,
    workspace_id: WorkspaceId,
    commit_id: &str,
    commit_date: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE git_sync_configs SET last_commit_id = ?1, last_commit_date = ?2
         WHERE workspace_id = ?3",
        params![commit_id, timestamp(commit_date), workspace_id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "git_sync_config".into(),
            id: workspace_id.to_string(),
        });
    }
    Ok(())
}

/// Append a snapshot.
pub fn insert_snapshot_tx(conn: &Connection, snapshot: &DocumentSnapshot) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO versions (id, workspace_id, content_piece_id, variant_id, label, buffer,
             content_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            snapshot.id,
            snapshot.workspace_id,
            snapshot.unit.piece,
            snapshot.unit.variant_key(),
            snapshot.label,
            snapshot.buffer,
            snapshot.content_hash,
            timestamp(snapshot.created_at)
        ],
    )?;
    debug!(id = %snapshot.id, unit = %snapshot.unit, "inserted snapshot");
    Ok(())
}

/// Insert a conflict row.
pub fn insert_conflict_tx(conn: &Connection, conflict: &Conflict) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO conflicts (id, workspace_id, content_piece_id, variant_id, path, kind,
             incoming_text, incoming_hash, synced_hash, current_hash, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            conflict.id,
            conflict.workspace_id,
            conflict.unit.piece,
            conflict.unit.variant_key(),
            conflict.path,
            conflict.kind.to_string(),
            conflict.incoming_text,
            conflict.incoming_hash,
            conflict.synced_hash,
            conflict.current_hash,
            conflict.status.to_string(),
            timestamp(conflict.created_at)
        ],
    )?;
    debug!(id = %conflict.id, path = %conflict.path, "inserted conflict");
    Ok(())
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- content groups & variants --------------------------------------------

    /// Create a new content group.
    pub fn create_content_group(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
    ) -> Result<ContentGroup, DatabaseError> {
        let group = ContentGroup {
            id: ContentGroupId::new(),
            workspace_id,
            name: name.to_string(),
        };
        self.conn().execute(
            "INSERT INTO content_groups (id, workspace_id, name) VALUES (?1, ?2, ?3)",
            params![group.id, group.workspace_id, group.name],
        )?;
        debug!(id = %group.id, name, "created content group");
        Ok(group)
    }

    /// Find a content group by name, creating it when missing.
    pub fn get_or_create_content_group(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
    ) -> Result<ContentGroup, DatabaseError> {
        let existing = self
            .conn()
            .query_row(
                "SELECT id FROM content_groups WHERE workspace_id = ?1 AND name = ?2",
                params![workspace_id, name],
                |row| row.get::<_, ContentGroupId>(0),
            )
            .optional()?;
        match existing {
            Some(id) => Ok(ContentGroup {
                id,
                workspace_id,
                name: name.to_string(),
            }),
            None => self.create_content_group(workspace_id, name),
        }
    }

    /// Create a new variant.
    pub fn create_variant(
        &self,
        workspace_id: WorkspaceId,
        key: &str,
    ) -> Result<Variant, DatabaseError> {
        let variant = Variant {
            id: VariantId::new(),
            workspace_id,
            key: key.to_string(),
        };
        self.conn().execute(
            "INSERT INTO variants (id, workspace_id, key) VALUES (?1, ?2, ?3)",
            params![variant.id, variant.workspace_id, variant.key],
        )?;
        Ok(variant)
    }

    /// Get a variant by id.
    pub fn get_variant(&self, id: VariantId) -> Result<Option<Variant>, DatabaseError> {
        let variant = self
            .conn()
            .query_row(
                "SELECT id, workspace_id, key FROM variants WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Variant {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        key: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(variant)
    }

    /// List all variants of a workspace.
    pub fn list_variants(&self, workspace_id: WorkspaceId) -> Result<Vec<Variant>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, key FROM variants WHERE workspace_id = ?1 ORDER BY key",
        )?;
        let variants = stmt
            .query_map(params![workspace_id], |row| {
                Ok(Variant {
                    id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    key: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(variants)
    }

    // -- content pieces -------------------------------------------------------

    /// Create a content piece with an initial (base) body.
    pub fn create_content_piece(
        &self,
        workspace_id: WorkspaceId,
        content_group_id: ContentGroupId,
        metadata: ContentMetadata,
        filename: Option<String>,
        buffer: &[u8],
    ) -> Result<ContentPiece, DatabaseError> {
        let now = Utc::now();
        let piece = ContentPiece {
            id: ContentPieceId::new(),
            workspace_id,
            content_group_id,
            filename,
            metadata,
            created_at: now,
            updated_at: now,
        };
        self.transaction(|conn| {
            insert_content_piece_tx(conn, &piece)?;
            set_content_buffer_tx(conn, &ContentUnit::piece(piece.id), buffer)
        })?;
        debug!(id = %piece.id, title = %piece.metadata.title, "created content piece");
        Ok(piece)
    }

    /// Get a content piece by id.
    pub fn get_content_piece(
        &self,
        id: ContentPieceId,
    ) -> Result<Option<ContentPiece>, DatabaseError> {
        let sql = format!("SELECT {PIECE_COLUMNS} FROM content_pieces WHERE id = ?1");
        let piece = self
            .conn()
            .query_row(&sql, params![id], piece_from_row)
            .optional()?;
        Ok(piece)
    }

    /// List all content pieces of a workspace, oldest first.
    pub fn list_content_pieces(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ContentPiece>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {PIECE_COLUMNS} FROM content_pieces WHERE workspace_id = ?1
             ORDER BY created_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let pieces = stmt
            .query_map(params![workspace_id], piece_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pieces)
    }

    /// Overwrite the metadata of a content piece.
    pub fn update_content_metadata(
        &self,
        piece: ContentPieceId,
        metadata: &ContentMetadata,
    ) -> Result<(), DatabaseError> {
        update_metadata_tx(&self.conn(), piece, metadata)
    }

    /// Delete a unit's body (or the whole piece for a base unit).
    pub fn delete_content_unit(&self, unit: &ContentUnit) -> Result<(), DatabaseError> {
        delete_content_unit_tx(&self.conn(), unit)?;
        debug!(unit = %unit, "deleted content unit");
        Ok(())
    }

    // -- content bodies -------------------------------------------------------

    /// Store the structured buffer of a unit.
    pub fn set_content_buffer(&self, unit: &ContentUnit, buffer: &[u8]) -> Result<(), DatabaseError> {
        set_content_buffer_tx(&self.conn(), unit, buffer)
    }

    /// Get the structured buffer of a unit.
    pub fn get_content_buffer(&self, unit: &ContentUnit) -> Result<Option<Vec<u8>>, DatabaseError> {
        get_content_buffer_tx(&self.conn(), unit)
    }

    /// Every unit with a stored body in the workspace.
    pub fn list_content_units(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ContentUnit>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.content_piece_id, c.variant_id
             FROM contents c JOIN content_pieces p ON p.id = c.content_piece_id
             WHERE p.workspace_id = ?1
             ORDER BY p.created_at, p.rowid, c.variant_id",
        )?;
        let units = stmt
            .query_map(params![workspace_id], |row| unit_from_row(row, 0, 1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    // -- git sync configuration -----------------------------------------------

    /// Insert a new configuration together with its directory mappings.
    pub fn insert_git_sync_config(&self, config: &GitSyncConfiguration) -> Result<(), DatabaseError> {
        let provider = &config.provider;
        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO git_sync_configs (workspace_id, provider, repository, branch,
                     base_directory, transformer, variant_subdirectories, last_commit_id,
                     last_commit_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    config.workspace_id,
                    provider.kind.to_string(),
                    provider.repository,
                    provider.branch,
                    provider.base_directory,
                    provider.transformer.to_string(),
                    provider.variant_subdirectories,
                    config.last_commit_id,
                    config.last_commit_date.map(timestamp),
                    timestamp(config.created_at)
                ],
            )?;
            for dir in &config.directories {
                conn.execute(
                    "INSERT INTO git_directories (workspace_id, path, content_group_id)
                     VALUES (?1, ?2, ?3)",
                    params![config.workspace_id, dir.path, dir.content_group_id],
                )?;
            }
            for record in &config.records {
                upsert_sync_record_tx(conn, config.workspace_id, record)?;
            }
            Ok(())
        })?;
        debug!(workspace_id = %config.workspace_id, "inserted git sync configuration");
        Ok(())
    }

    /// Load the configuration of a workspace, with directories and records.
    pub fn get_git_sync_config(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<GitSyncConfiguration>, DatabaseError> {
        let row = self
            .conn()
            .query_row(
                "SELECT provider, repository, branch, base_directory, transformer,
                     variant_subdirectories, last_commit_id, last_commit_date, created_at
                 FROM git_sync_configs WHERE workspace_id = ?1",
                params![workspace_id],
                |row| {
                    let provider: String = row.get(0)?;
                    let transformer: String = row.get(4)?;
                    let last_commit_date: Option<String> = row.get(7)?;
                    let created_at: String = row.get(8)?;
                    Ok((
                        ProviderConfig {
                            kind: provider.parse().unwrap_or_default(),
                            repository: row.get(1)?,
                            branch: row.get(2)?,
                            base_directory: row.get(3)?,
                            transformer: transformer.parse().unwrap_or_default(),
                            variant_subdirectories: row.get(5)?,
                        },
                        row.get::<_, Option<String>>(6)?,
                        last_commit_date.as_deref().and_then(parse_timestamp),
                        parse_timestamp(&created_at).unwrap_or_else(Utc::now),
                    ))
                },
            )
            .optional()?;

        let Some((provider, last_commit_id, last_commit_date, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(GitSyncConfiguration {
            workspace_id,
            provider,
            directories: self.list_directories(workspace_id)?,
            records: self.list_sync_records(workspace_id)?,
            last_commit_id,
            last_commit_date,
            created_at,
        }))
    }

    /// Whether a configuration exists for the workspace.
    pub fn has_git_sync_config(&self, workspace_id: WorkspaceId) -> Result<bool, DatabaseError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM git_sync_configs WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Delete a configuration; directories and records cascade.
    pub fn delete_git_sync_config(&self, workspace_id: WorkspaceId) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "DELETE FROM git_sync_configs WHERE workspace_id = ?1",
            params![workspace_id],
        )?;
        debug!(workspace_id = %workspace_id, changed, "deleted git sync configuration");
        Ok(changed > 0)
    }

    /// Advance the last known commit.
    pub fn update_last_commit(
        &self,
        workspace_id: WorkspaceId,
        commit_id: &str,
        commit_date: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        update_last_commit_tx(&self.conn(), workspace_id, commit_id, commit_date)
    }

    /// List the directory mappings of a workspace.
    pub fn list_directories(&self, workspace_id: WorkspaceId) -> Result<Vec<Directory>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT path, content_group_id FROM git_directories WHERE workspace_id = ?1
             ORDER BY path",
        )?;
        let dirs = stmt
            .query_map(params![workspace_id], |row| {
                Ok(Directory {
                    path: row.get(0)?,
                    content_group_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dirs)
    }

    // -- sync records ---------------------------------------------------------

    /// All records of a workspace, ordered by path.
    pub fn list_sync_records(&self, workspace_id: WorkspaceId) -> Result<Vec<SyncRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT content_piece_id, variant_id, path, synced_hash, current_hash
             FROM git_sync_records WHERE workspace_id = ?1 ORDER BY path",
        )?;
        let records = stmt
            .query_map(params![workspace_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records whose current hash differs from the synced hash.
    pub fn list_divergent_records(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<SyncRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT content_piece_id, variant_id, path, synced_hash, current_hash
             FROM git_sync_records WHERE workspace_id = ?1 AND synced_hash <> current_hash
             ORDER BY path",
        )?;
        let records = stmt
            .query_map(params![workspace_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The record of one unit.
    pub fn get_sync_record(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
    ) -> Result<Option<SyncRecord>, DatabaseError> {
        let record = self
            .conn()
            .query_row(
                "SELECT content_piece_id, variant_id, path, synced_hash, current_hash
                 FROM git_sync_records
                 WHERE workspace_id = ?1 AND content_piece_id = ?2 AND variant_id = ?3",
                params![workspace_id, unit.piece, unit.variant_key()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace a record.
    pub fn upsert_sync_record(
        &self,
        workspace_id: WorkspaceId,
        record: &SyncRecord,
    ) -> Result<(), DatabaseError> {
        upsert_sync_record_tx(&self.conn(), workspace_id, record)
    }

    /// Set only the current hash of an existing record.
    ///
    /// Returns `false` when the unit has no record.
    pub fn set_current_hash(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
        hash: &str,
    ) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE git_sync_records SET current_hash = ?1
             WHERE workspace_id = ?2 AND content_piece_id = ?3 AND variant_id = ?4",
            params![hash, workspace_id, unit.piece, unit.variant_key()],
        )?;
        Ok(changed > 0)
    }

    /// Set both hashes of an existing record.
    pub fn mark_synced(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
        hash: &str,
    ) -> Result<bool, DatabaseError> {
        mark_synced_tx(&self.conn(), workspace_id, unit, hash)
    }

    /// Remove a record.
    pub fn delete_sync_record(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
    ) -> Result<bool, DatabaseError> {
        delete_sync_record_tx(&self.conn(), workspace_id, unit)
    }

    // -- versions -------------------------------------------------------------

    /// Append a snapshot.
    pub fn insert_snapshot(&self, snapshot: &DocumentSnapshot) -> Result<(), DatabaseError> {
        insert_snapshot_tx(&self.conn(), snapshot)
    }

    /// Get a snapshot by id.
    pub fn get_snapshot(&self, id: SnapshotId) -> Result<Option<DocumentSnapshot>, DatabaseError> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM versions WHERE id = ?1");
        let snapshot = self
            .conn()
            .query_row(&sql, params![id], snapshot_from_row)
            .optional()?;
        Ok(snapshot)
    }

    /// All snapshots of a unit, oldest first.
    pub fn list_snapshots(&self, unit: &ContentUnit) -> Result<Vec<DocumentSnapshot>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM versions
             WHERE content_piece_id = ?1 AND variant_id = ?2
             ORDER BY created_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(params![unit.piece, unit.variant_key()], snapshot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    // -- conflicts ------------------------------------------------------------

    /// Persist a conflict.
    pub fn insert_conflict(&self, conflict: &Conflict) -> Result<(), DatabaseError> {
        insert_conflict_tx(&self.conn(), conflict)
    }

    /// Replace the pending conflicts of a workspace with `conflicts`.
    pub fn replace_pending_conflicts(
        &self,
        workspace_id: WorkspaceId,
        conflicts: &[Conflict],
    ) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            conn.execute(
                "DELETE FROM conflicts WHERE workspace_id = ?1 AND status = 'pending'",
                params![workspace_id],
            )?;
            for conflict in conflicts {
                insert_conflict_tx(conn, conflict)?;
            }
            Ok(())
        })
    }

    /// Get a conflict by id.
    pub fn get_conflict(&self, id: ConflictId) -> Result<Option<Conflict>, DatabaseError> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1");
        let conflict = self
            .conn()
            .query_row(&sql, params![id], conflict_from_row)
            .optional()?;
        Ok(conflict)
    }

    /// List conflicts of a workspace, optionally filtered by status.
    pub fn list_conflicts(
        &self,
        workspace_id: WorkspaceId,
        status: Option<ConflictStatus>,
    ) -> Result<Vec<Conflict>, DatabaseError> {
        let conn = self.conn();
        let conflicts = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts
                     WHERE workspace_id = ?1 AND status = ?2 ORDER BY created_at, rowid"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![workspace_id, status.to_string()], conflict_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts
                     WHERE workspace_id = ?1 ORDER BY created_at, rowid"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![workspace_id], conflict_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(conflicts)
    }

    /// Mark every pending conflict of `unit` resolved. Returns the count.
    pub fn resolve_conflicts_for_unit(
        &self,
        workspace_id: WorkspaceId,
        unit: &ContentUnit,
    ) -> Result<usize, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE conflicts SET status = 'resolved', resolved_at = ?1
             WHERE workspace_id = ?2 AND content_piece_id = ?3 AND variant_id = ?4
               AND status = 'pending'",
            params![timestamp(Utc::now()), workspace_id, unit.piece, unit.variant_key()],
        )?;
        Ok(changed)
    }

    /// Drop all pending conflicts of a workspace (superseded by a new pull).
    pub fn clear_pending_conflicts(&self, workspace_id: WorkspaceId) -> Result<usize, DatabaseError> {
        let changed = self.conn().execute(
            "DELETE FROM conflicts WHERE workspace_id = ?1 AND status = 'pending'",
            params![workspace_id],
        )?;
        Ok(changed)
    }

    // -- audit_log ------------------------------------------------------------

    /// Insert an audit entry.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (workspace_id, action, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.workspace_id,
                entry.action,
                entry.details,
                entry.success,
                timestamp(entry.created_at)
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit_log entry");
        Ok(id)
    }

    /// List recent audit-log entries, newest first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, action, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                let created_at: String = row.get(5)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    action: row.get(2)?,
                    details: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    success: row.get(4)?,
                    created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
