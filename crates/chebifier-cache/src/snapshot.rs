//! Durable snapshots of a [`PredictionCache`](crate::PredictionCache).
//!
//! Two on-disk formats, picked from the snapshot path's extension:
//!
//! * **JSON** – a single `{"version": 1, "entries": [...]}` document.
//! * **SQLite** – one `prediction_cache` table, values stored as JSON text
//!   (`.db`, `.sqlite`, `.sqlite3`).
//!
//! Entries are written least-recently-used first, so replaying them in file
//! order through [`PredictionCache::insert`](crate::PredictionCache::insert)
//! restores recency. Both writers build the snapshot in a temporary sibling
//! file and rename it over the target, so a failed save leaves the previous
//! snapshot intact.

use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Version tag written into JSON snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One cached prediction as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry<V> {
    pub smiles: String,
    pub model: String,
    pub value: V,
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite snapshot error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Serialize)]
struct JsonSnapshotOut<'a, V> {
    version: u32,
    entries: &'a [SnapshotEntry<V>],
}

#[derive(Deserialize)]
struct JsonSnapshotIn<V> {
    version: u32,
    entries: Vec<SnapshotEntry<V>>,
}

/// On-disk snapshot encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Sqlite,
}

impl SnapshotFormat {
    /// Pick the format for a snapshot path: SQLite for `.db`, `.sqlite` and
    /// `.sqlite3`, JSON for everything else.
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("db" | "sqlite" | "sqlite3") => Self::Sqlite,
            _ => Self::Json,
        }
    }

    /// Write `entries` to `path`, replacing any previous snapshot.
    pub fn write<V: Serialize>(
        self,
        path: &Path,
        entries: &[SnapshotEntry<V>],
    ) -> Result<(), SnapshotError> {
        let dir = parent_dir(path);
        fs::create_dir_all(&dir)?;
        match self {
            Self::Json => write_json(&dir, path, entries),
            Self::Sqlite => write_sqlite(&dir, path, entries),
        }
    }

    /// Read the snapshot at `path`.
    ///
    /// Returns `Ok(None)` when there is nothing to load: the file does not
    /// exist or is empty.
    pub fn read<V: DeserializeOwned>(
        self,
        path: &Path,
    ) -> Result<Option<Vec<SnapshotEntry<V>>>, SnapshotError> {
        match fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let entries = match self {
            Self::Json => read_json(path)?,
            Self::Sqlite => read_sqlite(path)?,
        };
        Ok(Some(entries))
    }
}

/// Read a snapshot, picking the format from the path.
pub fn read_snapshot<V: DeserializeOwned>(
    path: &Path,
) -> Result<Option<Vec<SnapshotEntry<V>>>, SnapshotError> {
    SnapshotFormat::for_path(path).read(path)
}

/// Delete the snapshot at `path`. Returns whether a file was removed.
pub fn remove_snapshot(path: &Path) -> Result<bool, SnapshotError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn write_json<V: Serialize>(
    dir: &Path,
    path: &Path,
    entries: &[SnapshotEntry<V>],
) -> Result<(), SnapshotError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(
            &mut writer,
            &JsonSnapshotOut {
                version: SNAPSHOT_VERSION,
                entries,
            },
        )?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_json<V: DeserializeOwned>(path: &Path) -> Result<Vec<SnapshotEntry<V>>, SnapshotError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let snapshot: JsonSnapshotIn<V> = serde_json::from_reader(reader)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot.entries)
}

fn write_sqlite<V: Serialize>(
    dir: &Path,
    path: &Path,
    entries: &[SnapshotEntry<V>],
) -> Result<(), SnapshotError> {
    let tmp_path = NamedTempFile::new_in(dir)?.into_temp_path();
    {
        let mut conn = Connection::open(&tmp_path)?;
        conn.execute_batch(
            "CREATE TABLE prediction_cache (
                 position   INTEGER PRIMARY KEY,
                 smiles     TEXT NOT NULL,
                 model      TEXT NOT NULL,
                 value_json TEXT NOT NULL,
                 UNIQUE (smiles, model)
             );",
        )?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO prediction_cache (position, smiles, model, value_json)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, entry) in entries.iter().enumerate() {
                let value_json = serde_json::to_string(&entry.value)?;
                stmt.execute(params![
                    position as i64,
                    entry.smiles,
                    entry.model,
                    value_json
                ])?;
            }
        }
        tx.commit()?;
        conn.close().map_err(|(_, e)| e)?;
    }
    tmp_path.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_sqlite<V: DeserializeOwned>(path: &Path) -> Result<Vec<SnapshotEntry<V>>, SnapshotError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare(
        "SELECT smiles, model, value_json FROM prediction_cache ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (smiles, model, value_json) = row?;
        entries.push(SnapshotEntry {
            smiles,
            model,
            value: serde_json::from_str(&value_json)?,
        });
    }
    Ok(entries)
}
