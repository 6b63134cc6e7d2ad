//! `rusqlite`-backed reference implementation of [`Database`].
//!
//! Mirrors the teacher's `SqliteVectorStore`: a `Mutex<Connection>`, WAL mode,
//! schema created via `execute_batch` on open, an `in_memory()` test
//! constructor. Complex nested fields (funnel categories, menu, metadata)
//! are stored as JSON text columns rather than normalized further.

use super::Database;
use crate::error::Result;
use crate::model::*;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, instrument};

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    name TEXT NOT NULL,
    timezone TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    run_date TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_location_date ON runs(location_id, run_date);

CREATE TABLE IF NOT EXISTS recordings (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    object_key TEXT NOT NULL,
    link TEXT,
    status TEXT NOT NULL,
    meta_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_recordings_run_id ON recordings(run_id);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    recording_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    meta_json TEXT NOT NULL,
    clip_ref TEXT,
    worker_id TEXT,
    worker_confidence REAL,
    worker_assignment_source TEXT NOT NULL,
    voice_processed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_transactions_run_id ON transactions(run_id);

CREATE TABLE IF NOT EXISTS grades (
    transaction_id TEXT PRIMARY KEY,
    body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS menus (
    location_id TEXT PRIMARY KEY,
    body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL,
    body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_analytics (
    run_id TEXT PRIMARY KEY,
    body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_analytics_worker (
    run_id TEXT NOT NULL,
    worker_id TEXT NOT NULL,
    body_json TEXT NOT NULL,
    PRIMARY KEY (run_id, worker_id)
);
CREATE INDEX IF NOT EXISTS idx_raw_run_id ON run_analytics_worker(run_id);
"#;

impl SqliteDatabase {
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!("Initialized SQLite database at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn run_status_str(s: RunStatus) -> &'static str {
    match s {
        RunStatus::Uploading => "uploading",
        RunStatus::Processing => "processing",
        RunStatus::Complete => "complete",
        RunStatus::Failed => "failed",
    }
}

fn run_status_from_str(s: &str) -> RunStatus {
    match s {
        "uploading" => RunStatus::Uploading,
        "processing" => RunStatus::Processing,
        "complete" => RunStatus::Complete,
        _ => RunStatus::Failed,
    }
}

fn worker_source_str(s: WorkerAssignmentSource) -> &'static str {
    match s {
        WorkerAssignmentSource::Voice => "voice",
        WorkerAssignmentSource::Unassigned => "unassigned",
    }
}

fn worker_source_from_str(s: &str) -> WorkerAssignmentSource {
    match s {
        "voice" => WorkerAssignmentSource::Voice,
        _ => WorkerAssignmentSource::Unassigned,
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    #[instrument(skip(self, location), fields(location_id = %location.id))]
    async fn upsert_location(&self, location: &Location) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO locations (id, org_id, name, timezone) VALUES (?1, ?2, ?3, ?4)",
            params![
                location.id.to_string(),
                location.org_id.to_string(),
                location.name,
                location.timezone,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_location(&self, location_id: Id) -> Result<Option<Location>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, org_id, name, timezone FROM locations WHERE id = ?1")?;
        let mut rows = stmt.query(params![location_id.to_string()])?;
        if let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let org_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let timezone: String = row.get(3)?;
            Ok(Some(Location {
                id: id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                org_id: org_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                name,
                timezone,
            }))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO runs (id, org_id, location_id, run_date, status, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id.to_string(),
                run.org_id.to_string(),
                run.location_id.to_string(),
                run.run_date.to_string(),
                run_status_str(run.status),
                run.started_at.to_rfc3339(),
                run.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Id) -> Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, org_id, location_id, run_date, status, started_at, ended_at FROM runs WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![run_id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_run(row)?))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self))]
    async fn find_run(&self, location_id: Id, run_date: chrono::NaiveDate) -> Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, org_id, location_id, run_date, status, started_at, ended_at FROM runs
             WHERE location_id = ?1 AND run_date = ?2",
        )?;
        let mut rows = stmt.query(params![location_id.to_string(), run_date.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_run(row)?))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self))]
    async fn set_run_status(
        &self,
        run_id: Id,
        status: RunStatus,
        ended_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if let Some(ended_at) = ended_at {
            conn.execute(
                "UPDATE runs SET status = ?1, ended_at = ?2 WHERE id = ?3",
                params![run_status_str(status), ended_at.to_rfc3339(), run_id.to_string()],
            )?;
        } else {
            conn.execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2",
                params![run_status_str(status), run_id.to_string()],
            )?;
        }
        Ok(())
    }

    #[instrument(skip(self, recording), fields(recording_id = %recording.id))]
    async fn insert_recording(&self, recording: &Recording) -> Result<()> {
        let meta_json = serde_json::to_string(&recording.meta)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO recordings
             (id, run_id, location_id, started_at, ended_at, object_key, link, status, meta_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                recording.id.to_string(),
                recording.run_id.to_string(),
                recording.location_id.to_string(),
                recording.started_at.to_rfc3339(),
                recording.ended_at.to_rfc3339(),
                recording.object_key,
                recording.link,
                format!("{:?}", recording.status),
                meta_json,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_recordings_for_run(&self, run_id: Id) -> Result<Vec<Recording>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, location_id, started_at, ended_at, object_key, link, status, meta_json
             FROM recordings WHERE run_id = ?1",
        )?;
        let recordings = stmt
            .query_map(params![run_id.to_string()], |row| {
                let id: String = row.get(0)?;
                let run_id: String = row.get(1)?;
                let location_id: String = row.get(2)?;
                let started_at: String = row.get(3)?;
                let ended_at: String = row.get(4)?;
                let object_key: String = row.get(5)?;
                let link: Option<String> = row.get(6)?;
                let status: String = row.get(7)?;
                let meta_json: String = row.get(8)?;
                Ok((id, run_id, location_id, started_at, ended_at, object_key, link, status, meta_json))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        recordings
            .into_iter()
            .map(
                |(id, run_id, location_id, started_at, ended_at, object_key, link, status, meta_json)| {
                    Ok(Recording {
                        id: id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                        run_id: run_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                        location_id: location_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                        started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
                            .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?
                            .with_timezone(&chrono::Utc),
                        ended_at: chrono::DateTime::parse_from_rfc3339(&ended_at)
                            .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?
                            .with_timezone(&chrono::Utc),
                        object_key,
                        link,
                        status: match status.as_str() {
                            "Uploaded" => RecordingStatus::Uploaded,
                            "Ready" => RecordingStatus::Ready,
                            "Failed" => RecordingStatus::Failed,
                            _ => RecordingStatus::Pending,
                        },
                        meta: serde_json::from_str(&meta_json)?,
                    })
                },
            )
            .collect()
    }

    #[instrument(skip(self, transactions), fields(count = transactions.len()))]
    async fn upsert_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for t in transactions {
            let meta_json = serde_json::to_string(&t.meta)?;
            tx.execute(
                "INSERT OR REPLACE INTO transactions
                 (id, run_id, recording_id, started_at, ended_at, meta_json, clip_ref,
                  worker_id, worker_confidence, worker_assignment_source, voice_processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    t.id.to_string(),
                    t.run_id.to_string(),
                    t.recording_id.to_string(),
                    t.started_at.to_rfc3339(),
                    t.ended_at.to_rfc3339(),
                    meta_json,
                    t.clip_ref,
                    t.worker_id.map(|w| w.to_string()),
                    t.worker_confidence,
                    worker_source_str(t.worker_assignment_source),
                    t.voice_processed_at.map(|v| v.to_rfc3339()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_transactions_for_run(&self, run_id: Id) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, recording_id, started_at, ended_at, meta_json, clip_ref,
                    worker_id, worker_confidence, worker_assignment_source, voice_processed_at
             FROM transactions WHERE run_id = ?1 ORDER BY started_at ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<f32>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, run_id, recording_id, started_at, ended_at, meta_json, clip_ref, worker_id, confidence, source, voice_at)| {
                Ok(Transaction {
                    id: id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                    run_id: run_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                    recording_id: recording_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
                    started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
                        .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?
                        .with_timezone(&chrono::Utc),
                    ended_at: chrono::DateTime::parse_from_rfc3339(&ended_at)
                        .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?
                        .with_timezone(&chrono::Utc),
                    kind: TransactionKind::Order,
                    meta: serde_json::from_str(&meta_json)?,
                    clip_ref,
                    worker_id: worker_id.and_then(|w| w.parse().ok()),
                    worker_confidence: confidence,
                    worker_assignment_source: worker_source_from_str(&source),
                    voice_processed_at: voice_at
                        .map(|v| chrono::DateTime::parse_from_rfc3339(&v).map(|d| d.with_timezone(&chrono::Utc)))
                        .transpose()
                        .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn assign_worker(
        &self,
        transaction_id: Id,
        worker_id: Option<Id>,
        confidence: Option<f32>,
        source: WorkerAssignmentSource,
        processed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE transactions SET worker_id = ?1, worker_confidence = ?2,
             worker_assignment_source = ?3, voice_processed_at = ?4 WHERE id = ?5",
            params![
                worker_id.map(|w| w.to_string()),
                confidence,
                worker_source_str(source),
                processed_at.to_rfc3339(),
                transaction_id.to_string(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self, grades), fields(count = grades.len()))]
    async fn upsert_grades(&self, grades: &[Grade]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for g in grades {
            let body_json = serde_json::to_string(g)?;
            tx.execute(
                "INSERT OR REPLACE INTO grades (transaction_id, body_json) VALUES (?1, ?2)",
                params![g.transaction_id.to_string(), body_json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_grades_for_run(&self, run_id: Id) -> Result<Vec<Grade>> {
        let transaction_ids: Vec<String> = self
            .get_transactions_for_run(run_id)
            .await?
            .into_iter()
            .map(|t| t.id.to_string())
            .collect();
        if transaction_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = transaction_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT body_json FROM grades WHERE transaction_id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            transaction_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let bodies = stmt
            .query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .into_iter()
            .map(|b| serde_json::from_str(&b).map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_menu(&self, location_id: Id) -> Result<Menu> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT body_json FROM menus WHERE location_id = ?1")?;
        let mut rows = stmt.query(params![location_id.to_string()])?;
        if let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            Ok(serde_json::from_str(&body)?)
        } else {
            Ok(Menu::default())
        }
    }

    #[instrument(skip(self))]
    async fn get_workers(&self, location_id: Id) -> Result<Vec<Worker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT body_json FROM workers WHERE location_id = ?1")?;
        let bodies = stmt
            .query_map(params![location_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .into_iter()
            .map(|b| serde_json::from_str(&b).map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self, analytics), fields(run_id = %analytics.run_id))]
    async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()> {
        let body_json = serde_json::to_string(analytics)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO run_analytics (run_id, body_json) VALUES (?1, ?2)",
            params![analytics.run_id.to_string(), body_json],
        )?;
        Ok(())
    }

    #[instrument(skip(self, analytics), fields(run_id = %analytics.run_id, worker_id = %analytics.worker_id))]
    async fn upsert_run_analytics_worker(&self, analytics: &RunAnalyticsWorker) -> Result<()> {
        let body_json = serde_json::to_string(analytics)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO run_analytics_worker (run_id, worker_id, body_json) VALUES (?1, ?2, ?3)",
            params![analytics.run_id.to_string(), analytics.worker_id.to_string(), body_json],
        )?;
        Ok(())
    }
}

fn row_to_run(row: &rusqlite::Row) -> Result<Run> {
    let id: String = row.get(0)?;
    let org_id: String = row.get(1)?;
    let location_id: String = row.get(2)?;
    let run_date: String = row.get(3)?;
    let status: String = row.get(4)?;
    let started_at: String = row.get(5)?;
    let ended_at: Option<String> = row.get(6)?;

    Ok(Run {
        id: id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
        org_id: org_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
        location_id: location_id.parse().map_err(|_| crate::error::HoptixError::InputMalformed("bad uuid".into()))?,
        run_date: run_date
            .parse()
            .map_err(|_| crate::error::HoptixError::InputMalformed("bad date".into()))?,
        status: run_status_from_str(&status),
        started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
            .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?
            .with_timezone(&chrono::Utc),
        ended_at: ended_at
            .map(|e| chrono::DateTime::parse_from_rfc3339(&e).map(|d| d.with_timezone(&chrono::Utc)))
            .transpose()
            .map_err(|_| crate::error::HoptixError::InputMalformed("bad timestamp".into()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn insert_and_fetch_location() {
        let db = SqliteDatabase::in_memory().unwrap();
        let location = Location {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "Route 9".to_string(),
            timezone: "America/New_York".to_string(),
        };
        db.upsert_location(&location).await.unwrap();
        let fetched = db.get_location(location.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Route 9");
        assert_eq!(fetched.timezone, "America/New_York");
    }

    #[tokio::test]
    async fn insert_and_fetch_run() {
        let db = SqliteDatabase::in_memory().unwrap();
        let run = Run {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            run_date: chrono::Utc::now().date_naive(),
            status: RunStatus::Processing,
            started_at: chrono::Utc::now(),
            ended_at: None,
        };
        db.insert_run(&run).await.unwrap();
        let fetched = db.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, run.id);
        assert_eq!(fetched.status, RunStatus::Processing);
    }

    #[tokio::test]
    async fn upsert_transactions_and_grades_round_trip() {
        let db = SqliteDatabase::in_memory().unwrap();
        let run_id = Uuid::new_v4();
        let tx_id = Uuid::new_v4();
        let t = Transaction {
            id: tx_id,
            run_id,
            recording_id: Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
            kind: TransactionKind::Order,
            meta: TransactionMeta::default(),
            clip_ref: None,
            worker_id: None,
            worker_confidence: None,
            worker_assignment_source: WorkerAssignmentSource::Unassigned,
            voice_processed_at: None,
        };
        db.upsert_transactions(&[t]).await.unwrap();

        let mut grade = Grade::default();
        grade.transaction_id = tx_id;
        grade.transcript = "hello".to_string();
        db.upsert_grades(&[grade]).await.unwrap();

        let grades = db.get_grades_for_run(run_id).await.unwrap();
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].transcript, "hello");
    }
}
