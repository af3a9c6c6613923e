//! Identity persistence.
//!
//! The pipeline depends on [`IdentityStore`] only; [`SqliteIdentityStore`] is
//! the shipped implementation.

use facegate_core::{Embedding, Identity};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("identity already exists: {0}")]
    Duplicate(String),
    #[error("stored encoding for {0} is corrupt")]
    CorruptEncoding(String),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub trait IdentityStore: Send + Sync {
    /// Every identity, in insertion order.
    fn load_all(&self) -> Result<Vec<Identity>, StoreError>;

    fn get(&self, name: &str) -> Result<Option<Identity>, StoreError>;

    fn contains(&self, name: &str) -> Result<bool, StoreError>;

    /// Insert a new identity. Fails with [`StoreError::Duplicate`] if the name exists.
    fn insert(
        &self,
        name: &str,
        encoding: &Embedding,
        profile_image: &[u8],
        timestamp: &str,
    ) -> Result<(), StoreError>;

    /// Returns `false` if no identity has that name.
    fn update_last_seen(&self, name: &str, timestamp: &str) -> Result<bool, StoreError>;

    /// Returns `false` if no identity has that name.
    fn remove(&self, name: &str) -> Result<bool, StoreError>;
}

/// Local wall-clock timestamp in the stored format.
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
}

const IDENTITY_COLUMNS: &str = "name, encoding, profile_image, enrolled_at, last_seen, total_spent";

impl SqliteIdentityStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        tracing::info!(path = %db_path.display(), "identity store opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS identities (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              encoding BLOB NOT NULL,
              profile_image BLOB NOT NULL,
              enrolled_at TEXT NOT NULL,
              last_seen TEXT NOT NULL,
              total_spent REAL NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Identity, bool)> {
    let name: String = row.get(0)?;
    let bytes: Vec<u8> = row.get(1)?;
    let (encoding, intact) = match Embedding::from_le_bytes(&bytes) {
        Some(e) => (e, true),
        None => (Embedding::new(Vec::new()), false),
    };
    Ok((
        Identity {
            name,
            encoding,
            profile_image: row.get(2)?,
            enrolled_at: row.get(3)?,
            last_seen: row.get(4)?,
            total_spent: row.get(5)?,
        },
        intact,
    ))
}

impl IdentityStore for SqliteIdentityStore {
    fn load_all(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_identity)?;

        let mut identities = Vec::new();
        for row in rows {
            let (identity, intact) = row?;
            if intact {
                identities.push(identity);
            } else {
                tracing::warn!(name = %identity.name, "skipping identity with corrupt encoding");
            }
        }
        Ok(identities)
    }

    fn get(&self, name: &str) -> Result<Option<Identity>, StoreError> {
        let conn = self.conn();
        let found = conn
            .query_row(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE name = ?1"),
                params![name],
                row_to_identity,
            )
            .optional()?;
        match found {
            Some((identity, true)) => Ok(Some(identity)),
            Some((_, false)) => Err(StoreError::CorruptEncoding(name.to_string())),
            None => Ok(None),
        }
    }

    fn contains(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let hit: Option<i64> = conn
            .query_row(
                "SELECT id FROM identities WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn insert(
        &self,
        name: &str,
        encoding: &Embedding,
        profile_image: &[u8],
        timestamp: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO identities (name, encoding, profile_image, enrolled_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, encoding.to_le_bytes(), profile_image, timestamp],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_last_seen(&self, name: &str, timestamp: &str) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE identities SET last_seen = ?1 WHERE name = ?2",
            params![timestamp, name],
        )?;
        Ok(changed > 0)
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn()
            .execute("DELETE FROM identities WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    }
}
