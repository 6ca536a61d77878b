//! SQLite-backed task store.
//!
//! Each task is stored as a JSON record, with the columns used for
//! filtering (state, type) kept alongside it.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{apply_to, TaskFilter, TaskMutation, TaskStore, TaskStoreError};
use super::types::Task;

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTaskStore").finish_non_exhaustive()
    }
}

fn db_err(e: impl std::fmt::Display) -> TaskStoreError {
    TaskStoreError::Database(e.to_string())
}

impl SqliteTaskStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: &Path) -> Result<Self, TaskStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                task_type TEXT NOT NULL,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn encode(task: &Task) -> Result<String, TaskStoreError> {
        serde_json::to_string(task).map_err(db_err)
    }

    fn decode(record: &str) -> Result<Task, TaskStoreError> {
        serde_json::from_str(record).map_err(db_err)
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Task>, TaskStoreError> {
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM tasks WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        record.as_deref().map(Self::decode).transpose()
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, task: Task) -> Result<Task, TaskStoreError> {
        let conn = self.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO tasks (id, task_type, state, record, updated_at) VALUES (?, ?, ?, ?, ?)",
                params![
                    task.id,
                    task.task_type.as_str(),
                    task.state.as_str(),
                    Self::encode(&task)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

        if inserted == 0 {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        Ok(task)
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskStoreError> {
        let conn = self.lock();
        Self::load(&conn, id)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskStoreError> {
        let conn = self.lock();

        let mut conditions = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(state) = filter.state {
            conditions.push("state = ?");
            values.push(state.as_str().to_string());
        }
        if let Some(ref task_type) = filter.task_type {
            conditions.push("task_type = ?");
            values.push(task_type.as_str().to_string());
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT record FROM tasks {} ORDER BY seq ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = values
            .into_iter()
            .map(|v| Box::new(v) as Box<dyn rusqlite::ToSql>)
            .collect();
        // SQLite treats a negative limit as unbounded.
        let limit = filter
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        all_params.push(Box::new(limit));
        all_params.push(Box::new(i64::try_from(filter.offset).unwrap_or(i64::MAX)));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(Self::decode(&row.map_err(db_err)?)?);
        }
        Ok(tasks)
    }

    fn apply(&self, id: &str, mutation: TaskMutation) -> Result<Task, TaskStoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let mut task =
            Self::load(&tx, id)?.ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        apply_to(&mut task, mutation, Utc::now())?;

        tx.execute(
            "UPDATE tasks SET state = ?, record = ?, updated_at = ? WHERE id = ?",
            params![
                task.state.as_str(),
                Self::encode(&task)?,
                Utc::now().to_rfc3339(),
                id
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(task)
    }
}
