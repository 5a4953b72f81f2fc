//! SQLite-backed member store.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;
use uuid::Uuid;
use vestibule_core::{Embedding, MemberRecord, MemberStore, StoreError};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS members (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id   TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    embedding   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS members_name ON members (name);
";

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("corrupt embedding for member {id}: {source}")]
    Embedding {
        id: String,
        source: serde_json::Error,
    },
    #[error("embedding for member {0} has non-finite components")]
    NonFinite(String),
    #[error("corrupt member id {0:?}")]
    MemberId(String),
    #[error("corrupt timestamp {0:?}")]
    Timestamp(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        StoreError::backend(err)
    }
}

/// Member records in a single SQLite table, loaded in insertion order.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SqliteStoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened member database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SqliteStoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    fn load_rows(&self) -> Result<Vec<MemberRecord>, SqliteStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT member_id, name, embedding, created_at FROM members ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, name, embedding, created_at) = row?;
            records.push(decode_record(id, name, &embedding, &created_at)?);
        }
        Ok(records)
    }

    fn insert(&self, record: &MemberRecord) -> Result<(), SqliteStoreError> {
        insert_row(&self.conn, record)
    }

    fn replace_name(&mut self, record: &MemberRecord) -> Result<usize, SqliteStoreError> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM members WHERE name = ?1", params![record.identity])?;
        insert_row(&tx, record)?;
        tx.commit()?;
        Ok(removed)
    }

    fn delete_name(&self, identity: &str) -> Result<usize, SqliteStoreError> {
        Ok(self
            .conn
            .execute("DELETE FROM members WHERE name = ?1", params![identity])?)
    }
}

impl MemberStore for SqliteStore {
    fn load(&mut self) -> Result<Vec<MemberRecord>, StoreError> {
        Ok(self.load_rows()?)
    }

    fn save(&mut self, record: &MemberRecord) -> Result<(), StoreError> {
        Ok(self.insert(record)?)
    }

    fn delete_by_identity(&mut self, identity: &str) -> Result<usize, StoreError> {
        Ok(self.delete_name(identity)?)
    }

    fn replace(&mut self, record: &MemberRecord) -> Result<usize, StoreError> {
        Ok(self.replace_name(record)?)
    }
}

/// JSON has no encoding for NaN or infinity, so such rows are refused.
fn insert_row(conn: &Connection, record: &MemberRecord) -> Result<(), SqliteStoreError> {
    if !record.embedding.is_finite() {
        return Err(SqliteStoreError::NonFinite(record.id.to_string()));
    }
    let embedding = serde_json::to_string(&record.embedding).map_err(|source| {
        SqliteStoreError::Embedding {
            id: record.id.to_string(),
            source,
        }
    })?;
    conn.execute(
        "INSERT INTO members (member_id, name, embedding, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.id.to_string(),
            record.identity,
            embedding,
            record.enrolled_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn decode_record(
    id: String,
    name: String,
    embedding: &str,
    created_at: &str,
) -> Result<MemberRecord, SqliteStoreError> {
    let member_id = Uuid::parse_str(&id).map_err(|_| SqliteStoreError::MemberId(id.clone()))?;
    let values: Vec<f64> = serde_json::from_str(embedding)
        .map_err(|source| SqliteStoreError::Embedding { id, source })?;
    let enrolled_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|_| SqliteStoreError::Timestamp(created_at.to_string()))?
        .with_timezone(&Utc);
    Ok(MemberRecord {
        id: member_id,
        identity: name,
        embedding: Embedding::new(values),
        enrolled_at,
    })
}
