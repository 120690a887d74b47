//! Process-wide project registry
//!
//! A small database in the user data directory listing every project the
//! engine has opened, for discovery by UIs and auxiliary tooling.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use tracing::debug;

use super::error::StoreResult;
use crate::domain::now_ms;

/// One known project
#[derive(Debug, Clone)]
pub struct ProjectEntry {
    pub root: String,
    pub name: String,
    pub last_opened: i64,
}

/// Registry of known projects
pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Default location: `<data dir>/orc/registry.db`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orc")
            .join("registry.db")
    }

    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS projects(
               root TEXT PRIMARY KEY,
               name TEXT NOT NULL,
               last_opened INTEGER NOT NULL
             );",
        )?;
        debug!(path = %path.display(), "Registry::open: ready");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS projects(
               root TEXT PRIMARY KEY,
               name TEXT NOT NULL,
               last_opened INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// Upsert a project, stamping the open time
    pub fn record_project(&self, root: &Path, name: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO projects (root, name, last_opened) VALUES (?1, ?2, ?3)
             ON CONFLICT(root) DO UPDATE SET name = excluded.name, last_opened = excluded.last_opened",
            params![root.display().to_string(), name, now_ms()],
        )?;
        Ok(())
    }

    /// All known projects, most recently opened first
    pub fn list_projects(&self) -> StoreResult<Vec<ProjectEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT root, name, last_opened FROM projects ORDER BY last_opened DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProjectEntry {
                root: row.get(0)?,
                name: row.get(1)?,
                last_opened: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
