//! SQLite persistence for case records.
//!
//! Only the record queue thread touches a [`RecordStore`]; everything else
//! goes through [`crate::records::RecordHandle`].

use casefile_core::{AnalysisMode, CaseRecord, PhotoSlots, PHOTO_SLOT_COUNT};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cases (
        id                TEXT PRIMARY KEY,
        title             TEXT NOT NULL,
        date              TEXT NOT NULL,
        solved            INTEGER NOT NULL DEFAULT 0,
        mode              TEXT NOT NULL DEFAULT 'none',
        suspect           TEXT NOT NULL DEFAULT '',
        photo_1           TEXT,
        photo_2           TEXT,
        photo_3           TEXT,
        photo_4           TEXT,
        detection_summary TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX IF NOT EXISTS idx_cases_date ON cases(date DESC);
";

const SELECT_COLUMNS: &str = "id, title, date, solved, mode, suspect, \
     photo_1, photo_2, photo_3, photo_4, detection_summary";

/// Fixed-width RFC 3339 so lexical order matches time order.
fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Raw column values, validated by [`RawRecord::into_record`].
struct RawRecord {
    id: String,
    title: String,
    date: String,
    solved: bool,
    mode: String,
    suspect: String,
    photos: [Option<String>; PHOTO_SLOT_COUNT],
    detection_summary: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            date: row.get(2)?,
            solved: row.get(3)?,
            mode: row.get(4)?,
            suspect: row.get(5)?,
            photos: [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
            detection_summary: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<CaseRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(format!("id: {e}")))?;
        let date = DateTime::parse_from_rfc3339(&self.date)
            .map_err(|e| corrupt(format!("date: {e}")))?
            .with_timezone(&Utc);
        let mode: AnalysisMode = self.mode.parse().map_err(|e| corrupt(format!("{e}")))?;

        Ok(CaseRecord {
            id,
            title: self.title,
            date,
            solved: self.solved,
            mode,
            suspect: self.suspect,
            photos: PhotoSlots::from(self.photos),
            detection_summary: self.detection_summary,
        })
    }
}

/// Case record table in a SQLite database.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "record store opened");
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a new record. Fails if the id already exists.
    pub fn create(&self, record: &CaseRecord) -> Result<(), StoreError> {
        let [p1, p2, p3, p4] = record.photos.as_array();
        self.conn.execute(
            "INSERT INTO cases (id, title, date, solved, mode, suspect,
                                photo_1, photo_2, photo_3, photo_4, detection_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                record.title,
                format_date(&record.date),
                record.solved,
                record.mode.as_str(),
                record.suspect,
                p1,
                p2,
                p3,
                p4,
                record.detection_summary,
            ],
        )?;
        Ok(())
    }

    /// Overwrite every column of an existing record. Returns false if absent.
    pub fn save(&self, record: &CaseRecord) -> Result<bool, StoreError> {
        let [p1, p2, p3, p4] = record.photos.as_array();
        let changed = self.conn.execute(
            "UPDATE cases SET title = ?2, date = ?3, solved = ?4, mode = ?5, suspect = ?6,
                              photo_1 = ?7, photo_2 = ?8, photo_3 = ?9, photo_4 = ?10,
                              detection_summary = ?11
             WHERE id = ?1",
            params![
                record.id.to_string(),
                record.title,
                format_date(&record.date),
                record.solved,
                record.mode.as_str(),
                record.suspect,
                p1,
                p2,
                p3,
                p4,
                record.detection_summary,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn load(&self, id: Uuid) -> Result<Option<CaseRecord>, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM cases WHERE id = ?1"),
                params![id.to_string()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// All records, newest first.
    pub fn list(&self) -> Result<Vec<CaseRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SELECT_COLUMNS} FROM cases ORDER BY date DESC"))?;
        let rows = stmt.query_map([], RawRecord::from_row)?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }

    /// Delete a record, returning it if it existed.
    pub fn delete(&self, id: Uuid) -> Result<Option<CaseRecord>, StoreError> {
        let existing = self.load(id)?;
        if existing.is_some() {
            self.conn
                .execute("DELETE FROM cases WHERE id = ?1", params![id.to_string()])?;
        }
        Ok(existing)
    }
}
