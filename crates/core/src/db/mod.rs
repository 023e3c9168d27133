//! SQLite storage for content bodies, Git sync state, version history and
//! the audit log.
//!
//! A [`Database`] owns one connection behind a mutex. Writes that must land
//! together (a commit, a pull, a resolution) go through
//! [`Database::transaction`].

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Pragmas set on every connection, file-backed or in-memory.
const CONNECTION_PRAGMAS: &[(&str, i64)] = &[("foreign_keys", 1), ("busy_timeout", 5000)];

/// Handle to the content database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file at `path`, creating it when missing.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(path = %path.display(), %journal, "opened content database");
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        debug!("opened in-memory content database");
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        for &(name, value) in CONNECTION_PRAGMAS {
            conn.pragma_update(None, name, value)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to the latest version.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let before = schema::schema_version(&conn)?;
        schema::run_migrations(&conn)?;
        let after = schema::schema_version(&conn)?;
        if after == before {
            debug!(version = after, "content schema up to date");
        } else {
            info!(from = before, to = after, "content schema migrated");
        }
        Ok(())
    }

    /// Version of the applied schema (0 before [`initialize`](Self::initialize)).
    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        schema::schema_version(&self.conn())
    }

    /// Lock the connection, taking over a lock poisoned by a panicking holder.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("content database lock was poisoned");
            poisoned.into_inner()
        })
    }

    /// Run `f` in an immediate transaction, committed when `f` returns `Ok`
    /// and rolled back otherwise.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }
}
