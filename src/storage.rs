//! Incident persistence.
//!
//! A worker hands ownership of each incident to the store at creation time;
//! records are immutable afterwards. `SqliteIncidentStore` is the production
//! store, `InMemoryIncidentStore` backs tests.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::frame::{Frame, JPEG_QUALITY};

/// Fields the worker supplies when an assignment passes the alert gate.
#[derive(Clone, Copy, Debug)]
pub struct NewIncident<'a> {
    pub camera_id: i64,
    pub label: &'a str,
    pub confidence: f32,
    pub track_id: u64,
    pub thumbnail_path: &'a Path,
}

/// A persisted incident. Immutable once created.
#[derive(Clone, Debug)]
pub struct IncidentRecord {
    pub id: i64,
    pub camera_id: i64,
    pub label: String,
    pub confidence: f32,
    pub track_id: u64,
    pub thumbnail_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub trait IncidentStore: Send {
    /// Persist a visual snapshot for an incident and return the final path.
    fn save_thumbnail(&mut self, frame: &Frame, path: &Path) -> Result<PathBuf>;

    /// Create the durable incident record. The returned record carries the
    /// store-assigned id and creation timestamp.
    fn create_incident(&mut self, incident: NewIncident<'_>) -> Result<IncidentRecord>;

    /// Most recent incidents for one camera, newest first.
    fn list_incidents(&mut self, camera_id: i64, limit: usize) -> Result<Vec<IncidentRecord>>;
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteIncidentStore {
    conn: Connection,
}

impl SqliteIncidentStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS incidents (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_id INTEGER NOT NULL,
              created_at TEXT NOT NULL,
              label TEXT NOT NULL,
              confidence REAL NOT NULL,
              track_id INTEGER NOT NULL,
              thumbnail_path TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_camera
              ON incidents(camera_id, created_at);
            "#,
        )?;
        Ok(())
    }
}

fn track_id_to_db(track_id: u64) -> Result<i64> {
    i64::try_from(track_id).map_err(|_| anyhow!("track id {} exceeds i64 range", track_id))
}

impl IncidentStore for SqliteIncidentStore {
    fn save_thumbnail(&mut self, frame: &Frame, path: &Path) -> Result<PathBuf> {
        write_thumbnail(frame, path)
    }

    fn create_incident(&mut self, incident: NewIncident<'_>) -> Result<IncidentRecord> {
        let created_at = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO incidents(camera_id, created_at, label, confidence, track_id, thumbnail_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                incident.camera_id,
                created_at.to_rfc3339(),
                incident.label,
                incident.confidence as f64,
                track_id_to_db(incident.track_id)?,
                incident.thumbnail_path.to_string_lossy().into_owned(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(IncidentRecord {
            id,
            camera_id: incident.camera_id,
            label: incident.label.to_string(),
            confidence: incident.confidence,
            track_id: incident.track_id,
            thumbnail_path: incident.thumbnail_path.to_path_buf(),
            created_at,
        })
    }

    fn list_incidents(&mut self, camera_id: i64, limit: usize) -> Result<Vec<IncidentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, camera_id, created_at, label, confidence, track_id, thumbnail_path
            FROM incidents WHERE camera_id = ?1
            ORDER BY id DESC LIMIT ?2
            "#,
        )?;
        let mut rows = stmt.query(params![camera_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at_raw: String = row.get(2)?;
            let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
                .map_err(|e| anyhow!("corrupt incident timestamp {:?}: {}", created_at_raw, e))?
                .with_timezone(&Utc);
            let track_id_raw: i64 = row.get(5)?;
            let thumbnail_raw: String = row.get(6)?;
            out.push(IncidentRecord {
                id: row.get(0)?,
                camera_id: row.get(1)?,
                created_at,
                label: row.get(3)?,
                confidence: row.get::<_, f64>(4)? as f32,
                track_id: u64::try_from(track_id_raw)
                    .map_err(|_| anyhow!("corrupt incident track id {}", track_id_raw))?,
                thumbnail_path: PathBuf::from(thumbnail_raw),
            });
        }
        Ok(out)
    }
}

fn write_thumbnail(frame: &Frame, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("create thumbnail dir {}: {}", parent.display(), e))?;
    }
    let jpeg = frame.encode_thumbnail_jpeg(JPEG_QUALITY)?;
    std::fs::write(path, jpeg)
        .map_err(|e| anyhow!("write thumbnail {}: {}", path.display(), e))?;
    Ok(path.to_path_buf())
}

// ----------------------------------------------------------------------------
// In-memory store (tests)
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryIncidentStore {
    next_id: i64,
    incidents: Vec<IncidentRecord>,
    thumbnails: Vec<PathBuf>,
    /// When set, `save_thumbnail` fails; exercises the at-most-once path.
    pub fail_thumbnails: bool,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incidents(&self) -> &[IncidentRecord] {
        &self.incidents
    }

    pub fn thumbnails(&self) -> &[PathBuf] {
        &self.thumbnails
    }
}

impl IncidentStore for InMemoryIncidentStore {
    fn save_thumbnail(&mut self, _frame: &Frame, path: &Path) -> Result<PathBuf> {
        if self.fail_thumbnails {
            return Err(anyhow!("in-memory store: thumbnail persistence disabled"));
        }
        self.thumbnails.push(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    fn create_incident(&mut self, incident: NewIncident<'_>) -> Result<IncidentRecord> {
        self.next_id += 1;
        let record = IncidentRecord {
            id: self.next_id,
            camera_id: incident.camera_id,
            label: incident.label.to_string(),
            confidence: incident.confidence,
            track_id: incident.track_id,
            thumbnail_path: incident.thumbnail_path.to_path_buf(),
            created_at: Utc::now(),
        };
        self.incidents.push(record.clone());
        Ok(record)
    }

    fn list_incidents(&mut self, camera_id: i64, limit: usize) -> Result<Vec<IncidentRecord>> {
        Ok(self
            .incidents
            .iter()
            .rev()
            .filter(|record| record.camera_id == camera_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
