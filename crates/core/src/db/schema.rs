//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "content schema",
        r#"
        CREATE TABLE IF NOT EXISTS content_groups (
            id            TEXT PRIMARY KEY,
            workspace_id  TEXT NOT NULL,
            name          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_content_groups_workspace ON content_groups (workspace_id);

        CREATE TABLE IF NOT EXISTS variants (
            id            TEXT PRIMARY KEY,
            workspace_id  TEXT NOT NULL,
            key           TEXT NOT NULL,
            UNIQUE (workspace_id, key)
        );

        CREATE TABLE IF NOT EXISTS content_pieces (
            id                TEXT PRIMARY KEY,
            workspace_id      TEXT NOT NULL,
            content_group_id  TEXT NOT NULL REFERENCES content_groups (id),
            filename          TEXT,
            title             TEXT NOT NULL DEFAULT '',
            description       TEXT,
            slug              TEXT,
            date              TEXT,
            tags              TEXT NOT NULL DEFAULT '[]',
            authors           TEXT NOT NULL DEFAULT '[]',
            canonical_link    TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_content_pieces_workspace ON content_pieces (workspace_id);

        CREATE TABLE IF NOT EXISTS contents (
            content_piece_id  TEXT NOT NULL REFERENCES content_pieces (id) ON DELETE CASCADE,
            variant_id        TEXT NOT NULL DEFAULT '',
            buffer            BLOB NOT NULL,
            updated_at        TEXT NOT NULL,
            PRIMARY KEY (content_piece_id, variant_id)
        );
        "#,
    ),
    (
        2,
        "git sync schema",
        r#"
        CREATE TABLE IF NOT EXISTS git_sync_configs (
            workspace_id            TEXT PRIMARY KEY,
            provider                TEXT NOT NULL,
            repository              TEXT NOT NULL,
            branch                  TEXT NOT NULL,
            base_directory          TEXT NOT NULL DEFAULT '',
            transformer             TEXT NOT NULL DEFAULT 'markdown',
            variant_subdirectories  INTEGER NOT NULL DEFAULT 1,
            last_commit_id          TEXT,
            last_commit_date        TEXT,
            created_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS git_directories (
            workspace_id      TEXT NOT NULL REFERENCES git_sync_configs (workspace_id) ON DELETE CASCADE,
            path              TEXT NOT NULL,
            content_group_id  TEXT NOT NULL,
            PRIMARY KEY (workspace_id, path)
        );

        CREATE TABLE IF NOT EXISTS git_sync_records (
            workspace_id      TEXT NOT NULL REFERENCES git_sync_configs (workspace_id) ON DELETE CASCADE,
            content_piece_id  TEXT NOT NULL,
            variant_id        TEXT NOT NULL DEFAULT '',
            path              TEXT NOT NULL,
            synced_hash       TEXT NOT NULL DEFAULT '',
            current_hash      TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (workspace_id, content_piece_id, variant_id),
            UNIQUE (workspace_id, path)
        );

        CREATE TABLE IF NOT EXISTS conflicts (
            id                TEXT PRIMARY KEY,
            workspace_id      TEXT NOT NULL,
            content_piece_id  TEXT NOT NULL,
            variant_id        TEXT NOT NULL DEFAULT '',
            path              TEXT NOT NULL,
            kind              TEXT NOT NULL,
            incoming_text     TEXT,
            incoming_hash     TEXT,
            synced_hash       TEXT NOT NULL,
            current_hash      TEXT NOT NULL,
            status            TEXT NOT NULL DEFAULT 'pending',
            created_at        TEXT NOT NULL,
            resolved_at       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts (workspace_id, status);
        "#,
    ),
    (
        3,
        "version history and audit log",
        r#"
        CREATE TABLE IF NOT EXISTS versions (
            id                TEXT PRIMARY KEY,
            workspace_id      TEXT NOT NULL,
            content_piece_id  TEXT NOT NULL,
            variant_id        TEXT NOT NULL DEFAULT '',
            label             TEXT,
            buffer            BLOB NOT NULL,
            content_hash      TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_versions_unit
            ON versions (content_piece_id, variant_id, created_at);

        CREATE TABLE IF NOT EXISTS audit_log (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace_id  TEXT,
            action        TEXT NOT NULL,
            details       TEXT,
            success       INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = schema_version(conn)?;
    info!(
        current_version,
        target_version = latest_version(),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Version the last migration brings the schema to.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.0)
}

/// Read the current schema version from the SQLite `user_version` pragma.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
