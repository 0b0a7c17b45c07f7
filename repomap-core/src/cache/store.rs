//! SQLite persistence for the tag cache, keyed by absolute path and fingerprint

use super::CacheEntry;
use crate::config::REPOMAP_DIR;
use crate::error::RepoMapError;
use crate::tag::{Fingerprint, Tag};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SCHEMA_VERSION: i32 = 1;

/// On-disk copy of the tag cache at `<root>/.repomap/tags.db`
pub struct TagStore {
    conn: Connection,
}

impl TagStore {
    pub fn open(repo_root: &Path) -> crate::Result<Self> {
        let dir = repo_root.join(REPOMAP_DIR);
        fs::create_dir_all(&dir)?;
        Self::open_at(&dir.join("tags.db"))
    }

    pub fn open_at(db_path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store, for tests
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(RepoMapError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tag_cache (
                    path TEXT PRIMARY KEY,
                    fingerprint TEXT NOT NULL,
                    tags TEXT NOT NULL,
                    generation INTEGER NOT NULL
                );
                ",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// All persisted entries. Rows that fail to decode are skipped.
    pub fn load_all(&self) -> crate::Result<Vec<(PathBuf, CacheEntry)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, fingerprint, tags, generation FROM tag_cache")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for (path, fingerprint, tags, generation) in rows.flatten() {
            let decoded = serde_json::from_str::<Fingerprint>(&fingerprint)
                .and_then(|fp| serde_json::from_str::<Vec<Tag>>(&tags).map(|t| (fp, t)));
            match decoded {
                Ok((fingerprint, tags)) => entries.push((
                    PathBuf::from(path),
                    CacheEntry {
                        fingerprint,
                        tags: Arc::new(tags),
                        generation: generation.max(0) as u64,
                    },
                )),
                Err(e) => tracing::debug!("skipping undecodable cache row for {path}: {e}"),
            }
        }
        Ok(entries)
    }

    pub fn save(&self, path: &Path, entry: &CacheEntry) -> crate::Result<()> {
        let fingerprint = serde_json::to_string(&entry.fingerprint)?;
        let tags = serde_json::to_string(entry.tags.as_ref())?;
        self.conn.execute(
            "INSERT INTO tag_cache (path, fingerprint, tags, generation) VALUES (?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                tags = excluded.tags,
                generation = excluded.generation
             WHERE excluded.generation >= tag_cache.generation",
            params![
                path.to_string_lossy(),
                fingerprint,
                tags,
                i64::try_from(entry.generation).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> crate::Result<()> {
        self.conn.execute(
            "DELETE FROM tag_cache WHERE path = ?",
            params![path.to_string_lossy()],
        )?;
        Ok(())
    }

    pub fn clear(&self) -> crate::Result<()> {
        self.conn.execute("DELETE FROM tag_cache", [])?;
        Ok(())
    }
}
