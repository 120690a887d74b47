//! Project database
//!
//! Single-file embedded relational store holding all tasks for one working
//! directory. Every state transition runs in one transaction; transcript
//! appends allocate gap-free per-phase sequence numbers inside the same
//! transaction as the insert. On open, any task left in `running` is
//! demoted to `paused` (crash recovery).

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use super::error::{StoreError, StoreResult};
use crate::domain::{
    Decision, EntryKind, PhaseState, PhaseStatus, Task, TaskId, TaskStatus, TranscriptEntry, Weight, now_ms,
};

/// Full task view used for resume
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub task: Task,
    pub phases: Vec<PhaseState>,
    pub transcript_tail: Vec<TranscriptEntry>,
}

/// Synchronous store over one project database. Writes are serialized by
/// the owning store actor; this type is not shared across threads.
pub struct ProjectStore {
    conn: Connection,
}

impl ProjectStore {
    /// Open or create the database at `path`, then demote crashed tasks.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;

        Self::create_tables(&conn)?;

        let store = Self { conn };
        let demoted = store.demote_running()?;
        if demoted > 0 {
            warn!(demoted, "Demoted running tasks to paused on open");
        }
        debug!(path = %path.display(), "ProjectStore::open: ready");
        Ok(store)
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(Self { conn })
    }

    fn create_tables(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks(
              id TEXT PRIMARY KEY,
              seq INTEGER UNIQUE NOT NULL,
              title TEXT NOT NULL,
              description TEXT NOT NULL,
              category TEXT,
              weight TEXT,
              status TEXT NOT NULL,
              current_phase TEXT,
              branch TEXT NOT NULL,
              target_branch TEXT NOT NULL,
              worktree_path TEXT,
              input_tokens INTEGER NOT NULL DEFAULT 0,
              output_tokens INTEGER NOT NULL DEFAULT 0,
              cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
              cache_read_tokens INTEGER NOT NULL DEFAULT 0,
              cost_usd REAL NOT NULL DEFAULT 0,
              last_error TEXT,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS phases(
              task_id TEXT NOT NULL,
              phase_id TEXT NOT NULL,
              name TEXT NOT NULL,
              status TEXT NOT NULL,
              iteration INTEGER NOT NULL DEFAULT 0,
              started_at INTEGER,
              completed_at INTEGER,
              last_error TEXT,
              artifact BLOB,
              PRIMARY KEY(task_id, phase_id),
              FOREIGN KEY(task_id) REFERENCES tasks(id)
            );

            CREATE TABLE IF NOT EXISTS transcript(
              task_id TEXT NOT NULL,
              phase_id TEXT NOT NULL,
              seq INTEGER NOT NULL,
              kind TEXT NOT NULL,
              content TEXT NOT NULL,
              input_tokens INTEGER NOT NULL DEFAULT 0,
              output_tokens INTEGER NOT NULL DEFAULT 0,
              cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
              cache_read_tokens INTEGER NOT NULL DEFAULT 0,
              created_at INTEGER NOT NULL,
              PRIMARY KEY(task_id, phase_id, seq),
              FOREIGN KEY(task_id) REFERENCES tasks(id)
            );

            CREATE TABLE IF NOT EXISTS decisions(
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              task_id TEXT NOT NULL,
              phase_id TEXT NOT NULL,
              question TEXT NOT NULL,
              options TEXT NOT NULL,
              answer TEXT,
              created_at INTEGER NOT NULL,
              resolved_at INTEGER,
              FOREIGN KEY(task_id) REFERENCES tasks(id)
            );
            "#,
        )?;
        Ok(())
    }

    /// Crash recovery: every `running` task becomes `paused`.
    pub fn demote_running(&self) -> StoreResult<usize> {
        let changed = self.conn.execute(
            "UPDATE tasks SET status = 'paused', updated_at = ?1 WHERE status = 'running'",
            params![now_ms()],
        )?;
        Ok(changed)
    }

    // === Tasks ===

    /// Create a task, allocating the next sequential id
    pub fn create_task(
        &mut self,
        title: &str,
        description: &str,
        category: Option<&str>,
        weight: Option<Weight>,
        target_branch: &str,
    ) -> StoreResult<Task> {
        let tx = self.conn.transaction()?;

        let next_seq: i64 = tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM tasks", [], |row| row.get(0))?;

        let mut task = Task::new(TaskId::from_seq(next_seq as u64), title, description, target_branch);
        task.category = category.map(|s| s.to_string());
        if let Some(w) = weight {
            task.set_weight(w);
        }

        tx.execute(
            "INSERT INTO tasks (id, seq, title, description, category, weight, status, current_phase,
                                branch, target_branch, worktree_path,
                                input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens,
                                cost_usd, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, 0, 0, 0, 0, NULL, ?12, ?13)",
            params![
                task.id.as_str(),
                next_seq,
                task.title,
                task.description,
                task.category,
                task.weight.map(|w| w.to_string()),
                task.status.to_string(),
                task.current_phase,
                task.branch,
                task.target_branch,
                task.worktree_path,
                task.created_at,
                task.updated_at,
            ],
        )?;
        tx.commit()?;

        info!(task_id = %task.id, "Created task");
        Ok(task)
    }

    pub fn load_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        self.conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", params![id.as_str()], row_to_task)
            .optional()
            .map_err(StoreError::from)
    }

    /// Load a task, erroring if absent
    pub fn load_task_required(&self, id: &TaskId) -> StoreResult<Task> {
        self.load_task(id)?
            .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))
    }

    pub fn list_tasks(&self, status_filter: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let mut out = Vec::new();
        match status_filter {
            Some(status) => {
                let mut stmt = self.conn.prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY seq")?;
                let rows = stmt.query_map(params![status.to_string()], row_to_task)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare("SELECT * FROM tasks ORDER BY seq")?;
                let rows = stmt.query_map([], row_to_task)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Full-row update of a task record
    pub fn update_task(&self, task: &Task) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, category = ?4, weight = ?5, status = ?6,
                              current_phase = ?7, branch = ?8, target_branch = ?9, worktree_path = ?10,
                              input_tokens = ?11, output_tokens = ?12, cache_creation_tokens = ?13,
                              cache_read_tokens = ?14, cost_usd = ?15, last_error = ?16, updated_at = ?17
             WHERE id = ?1",
            params![
                task.id.as_str(),
                task.title,
                task.description,
                task.category,
                task.weight.map(|w| w.to_string()),
                task.status.to_string(),
                task.current_phase,
                task.branch,
                task.target_branch,
                task.worktree_path,
                task.input_tokens as i64,
                task.output_tokens as i64,
                task.cache_creation_tokens as i64,
                task.cache_read_tokens as i64,
                task.cost_usd,
                task.last_error,
                now_ms(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Status transition with optimistic guard: fails when the stored
    /// status no longer matches `expected_prev` (a concurrent driver won).
    pub fn update_task_status(&self, id: &TaskId, status: TaskStatus, expected_prev: TaskStatus) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
            params![id.as_str(), status.to_string(), now_ms(), expected_prev.to_string()],
        )?;
        if changed == 0 {
            let actual = self.load_task_required(id)?.status;
            return Err(StoreError::StatusConflict {
                task_id: id.to_string(),
                expected: expected_prev,
                actual,
            });
        }
        Ok(())
    }

    // === Phases ===

    pub fn upsert_phase(&self, phase: &PhaseState) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO phases (task_id, phase_id, name, status, iteration, started_at, completed_at, last_error, artifact)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(task_id, phase_id) DO UPDATE SET
               name = excluded.name, status = excluded.status, iteration = excluded.iteration,
               started_at = excluded.started_at, completed_at = excluded.completed_at,
               last_error = excluded.last_error, artifact = excluded.artifact",
            params![
                phase.task_id.as_str(),
                phase.phase_id,
                phase.name,
                phase.status.to_string(),
                phase.iteration,
                phase.started_at,
                phase.completed_at,
                phase.last_error,
                phase.artifact,
            ],
        )?;
        Ok(())
    }

    pub fn load_phase(&self, task_id: &TaskId, phase_id: &str) -> StoreResult<Option<PhaseState>> {
        self.conn
            .query_row(
                "SELECT * FROM phases WHERE task_id = ?1 AND phase_id = ?2",
                params![task_id.as_str(), phase_id],
                row_to_phase,
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn load_phases(&self, task_id: &TaskId) -> StoreResult<Vec<PhaseState>> {
        let mut stmt = self.conn.prepare("SELECT * FROM phases WHERE task_id = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![task_id.as_str()], row_to_phase)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // === Transcript ===

    /// Append an entry, returning its assigned sequence. The allocation and
    /// insert share one transaction, so sequences are gap-free even across
    /// crashes.
    pub fn append_transcript(&mut self, entry: &TranscriptEntry) -> StoreResult<u64> {
        let tx = self.conn.transaction()?;

        let next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM transcript WHERE task_id = ?1 AND phase_id = ?2",
            params![entry.task_id.as_str(), entry.phase_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO transcript (task_id, phase_id, seq, kind, content,
                                     input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.task_id.as_str(),
                entry.phase_id,
                next_seq,
                entry.kind.to_string(),
                entry.content,
                entry.input_tokens as i64,
                entry.output_tokens as i64,
                entry.cache_creation_tokens as i64,
                entry.cache_read_tokens as i64,
                entry.created_at,
            ],
        )?;
        tx.commit()?;

        Ok(next_seq as u64)
    }

    pub fn load_transcript(&self, task_id: &TaskId, phase_id: &str) -> StoreResult<Vec<TranscriptEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM transcript WHERE task_id = ?1 AND phase_id = ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![task_id.as_str(), phase_id], row_to_transcript)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Last `n` transcript entries across all phases of a task
    pub fn transcript_tail(&self, task_id: &TaskId, n: usize) -> StoreResult<Vec<TranscriptEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM (
               SELECT * FROM transcript WHERE task_id = ?1 ORDER BY created_at DESC, seq DESC LIMIT ?2
             ) ORDER BY created_at, seq",
        )?;
        let rows = stmt.query_map(params![task_id.as_str(), n as i64], row_to_transcript)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // === Decisions ===

    pub fn register_decision(&self, decision: &Decision) -> StoreResult<u64> {
        self.conn.execute(
            "INSERT INTO decisions (task_id, phase_id, question, options, answer, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, NULL)",
            params![
                decision.task_id.as_str(),
                decision.phase_id,
                decision.question,
                serde_json::to_string(&decision.options)?,
                decision.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid() as u64)
    }

    pub fn resolve_decision(&self, id: u64, answer: &str) -> StoreResult<Decision> {
        let decision = self.get_decision(id)?;
        if !decision.is_open() {
            return Err(StoreError::AlreadyResolved(id));
        }
        self.conn.execute(
            "UPDATE decisions SET answer = ?2, resolved_at = ?3 WHERE id = ?1",
            params![id as i64, answer, now_ms()],
        )?;
        self.get_decision(id)
    }

    pub fn get_decision(&self, id: u64) -> StoreResult<Decision> {
        self.conn
            .query_row("SELECT * FROM decisions WHERE id = ?1", params![id as i64], row_to_decision)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("decision {}", id)))
    }

    pub fn open_decisions(&self, task_id: &TaskId) -> StoreResult<Vec<Decision>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM decisions WHERE task_id = ?1 AND answer IS NULL ORDER BY id")?;
        let rows = stmt.query_map(params![task_id.as_str()], row_to_decision)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // === Snapshot ===

    /// Task + phase states + recent transcript, for resume
    pub fn snapshot(&self, task_id: &TaskId, tail: usize) -> StoreResult<Snapshot> {
        Ok(Snapshot {
            task: self.load_task_required(task_id)?,
            phases: self.load_phases(task_id)?,
            transcript_tail: self.transcript_tail(task_id, tail)?,
        })
    }
}

// Row mappers

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let weight: Option<String> = row.get("weight")?;
    Ok(Task {
        id: TaskId::from(id),
        title: row.get("title")?,
        description: row.get("description")?,
        category: row.get("category")?,
        weight: weight.as_deref().and_then(Weight::parse),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        current_phase: row.get("current_phase")?,
        branch: row.get("branch")?,
        target_branch: row.get("target_branch")?,
        worktree_path: row.get("worktree_path")?,
        input_tokens: row.get::<_, i64>("input_tokens")? as u64,
        output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        cache_creation_tokens: row.get::<_, i64>("cache_creation_tokens")? as u64,
        cache_read_tokens: row.get::<_, i64>("cache_read_tokens")? as u64,
        cost_usd: row.get("cost_usd")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_phase(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhaseState> {
    let task_id: String = row.get("task_id")?;
    let status: String = row.get("status")?;
    Ok(PhaseState {
        task_id: TaskId::from(task_id),
        phase_id: row.get("phase_id")?,
        name: row.get("name")?,
        status: PhaseStatus::parse(&status).unwrap_or(PhaseStatus::Failed),
        iteration: row.get("iteration")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        last_error: row.get("last_error")?,
        artifact: row.get("artifact")?,
    })
}

fn row_to_transcript(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptEntry> {
    let task_id: String = row.get("task_id")?;
    let kind: String = row.get("kind")?;
    Ok(TranscriptEntry {
        task_id: TaskId::from(task_id),
        phase_id: row.get("phase_id")?,
        seq: row.get::<_, i64>("seq")? as u64,
        kind: EntryKind::parse(&kind).unwrap_or(EntryKind::Error),
        content: row.get("content")?,
        input_tokens: row.get::<_, i64>("input_tokens")? as u64,
        output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        cache_creation_tokens: row.get::<_, i64>("cache_creation_tokens")? as u64,
        cache_read_tokens: row.get::<_, i64>("cache_read_tokens")? as u64,
        created_at: row.get("created_at")?,
    })
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<Decision> {
    let task_id: String = row.get("task_id")?;
    let options: String = row.get("options")?;
    Ok(Decision {
        id: row.get::<_, i64>("id")? as u64,
        task_id: TaskId::from(task_id),
        phase_id: row.get("phase_id")?,
        question: row.get("question")?,
        options: serde_json::from_str(&options).unwrap_or_default(),
        answer: row.get("answer")?,
        created_at: row.get("created_at")?,
        resolved_at: row.get("resolved_at")?,
    })
}
