//! SQLite-backed persistence for schedules and the event log.
//! Schedules back triggers via `schedule_id`; the event log queues events
//! for the startup recovery sweep.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconflow_core::{Event, EventLogRow, EventLogStore, Schedule, ScheduleStore, StoreError};
use serde::Serialize;

/// Counts over the event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventLogStats {
    pub total: u64,
    pub pending: u64,
    pub failed: u64,
}

/// SQLite-backed store for all scheduler data. Clones share the connection.
#[derive(Clone)]
pub struct SchedulerDb {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch(
                "
            -- Persisted trigger configuration
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                trigger_name TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                target TEXT NOT NULL DEFAULT '',
                params TEXT NOT NULL DEFAULT '{}',   -- JSON object, any value types
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_trigger
                ON schedules (workflow_name, trigger_name);

            -- Events queued for delivery
            CREATE TABLE IF NOT EXISTS event_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                event_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL DEFAULT '',
                data_type TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL DEFAULT '',
                processed INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                processed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_event_logs_pending
                ON event_logs (processed, id);
         ",
            )
            .map_err(|e| StoreError::Query(format!("Migration: {e}")))
    }

    // ─── Schedules ────────────────────────────────────────────

    /// Insert or replace a schedule.
    pub fn save_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        let params = serde_json::Value::Object(schedule.params.clone()).to_string();
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO schedules
                 (id, workflow_name, trigger_name, is_enabled, target, params, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    schedule.id,
                    schedule.workflow_name,
                    schedule.trigger_name,
                    schedule.is_enabled as i32,
                    schedule.target,
                    params,
                    schedule.created_at.to_rfc3339(),
                    schedule.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Query(format!("Save schedule: {e}")))?;
        tracing::debug!("💾 Saved schedule {}", schedule.id);
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> Result<Schedule, StoreError> {
        self.query_schedules("WHERE id = ?1", rusqlite::params![id])?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("schedule {id}")))
    }

    /// The schedule bound to a workflow's trigger, if any.
    pub fn find_schedule(
        &self,
        workflow_name: &str,
        trigger_name: &str,
    ) -> Result<Option<Schedule>, StoreError> {
        Ok(self
            .query_schedules(
                "WHERE workflow_name = ?1 AND trigger_name = ?2",
                rusqlite::params![workflow_name, trigger_name],
            )?
            .into_iter()
            .next())
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        self.query_schedules("", rusqlite::params![])
    }

    pub fn set_schedule_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE schedules SET is_enabled = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![enabled as i32, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| StoreError::Query(format!("Update schedule: {e}")))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    fn query_schedules(
        &self,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Schedule>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, workflow_name, trigger_name, is_enabled, target, params, created_at, updated_at
                 FROM schedules {filter} ORDER BY created_at"
            ))
            .map_err(|e| StoreError::Query(format!("Load schedules: {e}")))?;

        let rows = stmt
            .query_map(params, |row| {
                let params_str: String = row.get(5)?;
                let params = match serde_json::from_str(&params_str) {
                    Ok(serde_json::Value::Object(map)) => map,
                    _ => serde_json::Map::new(),
                };
                Ok(Schedule {
                    id: row.get(0)?,
                    workflow_name: row.get(1)?,
                    trigger_name: row.get(2)?,
                    is_enabled: row.get::<_, i32>(3)? != 0,
                    target: row.get(4)?,
                    params,
                    created_at: parse_time(&row.get::<_, String>(6)?),
                    updated_at: parse_time(&row.get::<_, String>(7)?),
                })
            })
            .map_err(|e| StoreError::Query(format!("Load schedules: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Query(format!("Load schedules: {e}")))
    }

    // ─── Event log ────────────────────────────────────────────

    /// Queue an event. Returns the row ID.
    pub fn record_event(&self, event: &Event) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO event_logs (topic, event_id, name, source, data_type, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                event.topic,
                event.id,
                event.name,
                event.source,
                event.data_type,
                event.data,
                event.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Query(format!("Record event: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Unprocessed rows, oldest first.
    pub fn unprocessed_events(&self, limit: usize) -> Result<Vec<EventLogRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, topic, event_id, name, source, data_type, data, processed, error, created_at, processed_at
                 FROM event_logs WHERE processed = 0 ORDER BY id LIMIT ?1",
            )
            .map_err(|e| StoreError::Query(format!("Load events: {e}")))?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(EventLogRow {
                    id: row.get(0)?,
                    topic: row.get(1)?,
                    event_id: row.get(2)?,
                    name: row.get(3)?,
                    source: row.get(4)?,
                    data_type: row.get(5)?,
                    data: row.get(6)?,
                    processed: row.get::<_, i32>(7)? != 0,
                    error: row.get(8)?,
                    created_at: parse_time(&row.get::<_, String>(9)?),
                    processed_at: row
                        .get::<_, Option<String>>(10)?
                        .map(|s| parse_time(&s)),
                })
            })
            .map_err(|e| StoreError::Query(format!("Load events: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Query(format!("Load events: {e}")))
    }

    pub fn mark_event_processed(&self, id: i64, error: Option<&str>) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE event_logs SET processed = 1, error = ?1, processed_at = ?2 WHERE id = ?3",
                rusqlite::params![error, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| StoreError::Query(format!("Mark processed: {e}")))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("event log row {id}")));
        }
        Ok(())
    }

    pub fn event_log_stats(&self) -> Result<EventLogStats, StoreError> {
        self.conn()
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END), 0)
                 FROM event_logs",
                [],
                |row| {
                    Ok(EventLogStats {
                        total: row.get::<_, i64>(0)? as u64,
                        pending: row.get::<_, i64>(1)? as u64,
                        failed: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .map_err(|e| StoreError::Query(format!("Event stats: {e}")))
    }
}

/// Run a blocking DB call off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(format!("DB task: {e}")))?
}

#[async_trait]
impl ScheduleStore for SchedulerDb {
    async fn get_schedule_by_id(&self, id: &str) -> Result<Schedule, StoreError> {
        let db = self.clone();
        let id = id.to_string();
        blocking(move || db.get_schedule(&id)).await
    }
}

#[async_trait]
impl EventLogStore for SchedulerDb {
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<EventLogRow>, StoreError> {
        let db = self.clone();
        blocking(move || db.unprocessed_events(limit)).await
    }

    async fn mark_processed(&self, id: i64, error: Option<&str>) -> Result<(), StoreError> {
        let db = self.clone();
        let error = error.map(str::to_string);
        blocking(move || db.mark_event_processed(id, error.as_deref())).await
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
