use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, Row};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

use engine::{NewVideoRecord, Provenance, ValidationError, VideoRecord, VideoResult, VideoStatus};

#[derive(Debug, Clone)]
pub enum DbLocation {
    File(PathBuf),
    /// Private to one connection: disconnecting discards the data.
    Memory,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A video with storage key {0} already exists")]
    Duplicate(String),

    #[error("Metadata store connection lock poisoned")]
    Poisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Outcome of persisting a generated video's record. A failed write is
/// reported as `Degraded` because the video itself is already stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    Stored(VideoRecord),
    Degraded { reason: String },
}

/// Video metadata on SQLite, behind one long-lived connection that is
/// opened on first use and can be dropped and re-established explicitly.
pub struct MetadataStore {
    location: DbLocation,
    conn: Mutex<Option<Connection>>,
}

const COLUMNS: &str = "id, prompt, storage_key, status, format, provider_name, mime_type, \
    create_time, expiration_time, update_time, uri, download_uri, source, duration_seconds, \
    user_id, created_at, updated_at";

impl MetadataStore {
    pub fn new(location: DbLocation) -> Self {
        MetadataStore {
            location,
            conn: Mutex::new(None),
        }
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = MetadataStore::new(DbLocation::Memory);
        store.connect()?;
        Ok(store)
    }

    /// Open the connection if it is not open yet.
    pub fn connect(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        if let Some(conn) = guard.take() {
            match conn.close() {
                Ok(()) => info!("Metadata store disconnected"),
                Err((_, e)) => warn!(error = %e, "Metadata store did not close cleanly"),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        let conn = match self.location {
            DbLocation::File(ref path) => Connection::open(path)?,
            DbLocation::Memory => Connection::open_in_memory()?,
        };
        init_schema(&conn)?;
        info!(location = ?self.location, "Metadata store connected");
        Ok(conn)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let conn = match guard.take() {
            Some(conn) => conn,
            None => self.open()?,
        };
        f(guard.insert(conn))
    }

    pub fn create(&self, record: NewVideoRecord) -> Result<VideoRecord, StoreError> {
        let now = Utc::now();
        let record = record.validate(now)?;

        self.with_conn(|conn| {
            let p = &record.provenance;
            conn.execute(
                "INSERT INTO videos (prompt, storage_key, status, format, provider_name, mime_type,
                    create_time, expiration_time, update_time, uri, download_uri, source,
                    duration_seconds, user_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    record.prompt,
                    record.storage_key,
                    record.status.as_str(),
                    record.format,
                    p.provider_name,
                    p.mime_type,
                    p.create_time,
                    p.expiration_time,
                    p.update_time,
                    p.uri,
                    p.download_uri,
                    p.source,
                    p.duration_seconds,
                    record.user_id,
                    now,
                    now,
                ],
            )
            .map_err(|e| insert_error(e, &record.storage_key))?;

            Ok(VideoRecord {
                id: conn.last_insert_rowid(),
                prompt: record.prompt.clone(),
                storage_key: record.storage_key.clone(),
                status: record.status,
                format: record.format.clone(),
                provenance: record.provenance.clone(),
                user_id: record.user_id.clone(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Persist the record for a finished generation without failing the caller.
    pub fn record_generation(&self, result: &VideoResult, user_id: Option<&str>) -> Persisted {
        match self.create(NewVideoRecord::from_result(result, user_id)) {
            Ok(record) => Persisted::Stored(record),
            Err(e) => Persisted::Degraded {
                reason: e.to_string(),
            },
        }
    }

    /// All records, newest first.
    pub fn find_all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        self.query("", &[])
    }

    pub fn find_by_user(&self, user_id: &str) -> Result<Vec<VideoRecord>, StoreError> {
        self.query("WHERE user_id = ?1", &[&user_id])
    }

    pub fn find_by_status(&self, status: VideoStatus) -> Result<Vec<VideoRecord>, StoreError> {
        // Active rows are loaded too: any of them may turn out to be expired
        let mut records = self.query(
            "WHERE status = ?1 OR status = ?2",
            &[&status.as_str(), &VideoStatus::Active.as_str()],
        )?;
        records.retain(|r| r.status == status);
        Ok(records)
    }

    pub fn find_by_storage_key(&self, key: &str) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.query("WHERE storage_key = ?1", &[&key])?.into_iter().next())
    }

    /// Load records and apply the lazy expiry check, writing back any
    /// status that changed.
    fn query(&self, filter: &str, args: &[&dyn ToSql]) -> Result<Vec<VideoRecord>, StoreError> {
        let now = Utc::now();
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM videos {} ORDER BY created_at DESC, id DESC",
                COLUMNS, filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut records = stmt
                .query_map(args, record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            for record in records.iter_mut() {
                if record.refresh_status(now) {
                    conn.execute(
                        "UPDATE videos SET status = ?1, updated_at = ?2 WHERE id = ?3",
                        params![record.status.as_str(), record.updated_at, record.id],
                    )?;
                }
            }
            Ok(records)
        })
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt TEXT NOT NULL CHECK (length(prompt) BETWEEN 1 AND 1000),
            storage_key TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'ACTIVE'
                CHECK (status IN ('ACTIVE', 'PROCESSING', 'FAILED', 'EXPIRED')),
            format TEXT NOT NULL DEFAULT 'video/mp4',
            provider_name TEXT,
            mime_type TEXT,
            create_time TEXT,
            expiration_time TEXT,
            update_time TEXT,
            uri TEXT,
            download_uri TEXT,
            source TEXT,
            duration_seconds REAL,
            user_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_videos_user_id ON videos(user_id);
        CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);",
    )?;
    Ok(())
}

fn insert_error(err: rusqlite::Error, storage_key: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Duplicate(storage_key.to_string())
        }
        other => StoreError::Database(other),
    }
}

fn record_from_row(row: &Row) -> rusqlite::Result<VideoRecord> {
    let status: String = row.get(3)?;
    let status = status
        .parse()
        .map_err(|_| rusqlite::Error::InvalidColumnType(3, "TEXT".to_string(), Type::Text))?;

    Ok(VideoRecord {
        id: row.get(0)?,
        prompt: row.get(1)?,
        storage_key: row.get(2)?,
        status,
        format: row.get(4)?,
        provenance: Provenance {
            provider_name: row.get(5)?,
            mime_type: row.get(6)?,
            create_time: row.get(7)?,
            expiration_time: row.get(8)?,
            update_time: row.get(9)?,
            uri: row.get(10)?,
            download_uri: row.get(11)?,
            source: row.get(12)?,
            duration_seconds: row.get(13)?,
        },
        user_id: row.get(14)?,
        created_at: row.get::<_, DateTime<Utc>>(15)?,
        updated_at: row.get::<_, DateTime<Utc>>(16)?,
    })
}
