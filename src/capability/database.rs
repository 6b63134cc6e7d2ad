//! Database capability (§6.3): typed row upsert/select for the §3 entities.

use crate::error::Result;
use crate::model::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait Database: Send + Sync {
    async fn upsert_location(&self, location: &Location) -> Result<()>;
    async fn get_location(&self, location_id: Id) -> Result<Option<Location>>;

    async fn insert_run(&self, run: &Run) -> Result<()>;
    async fn get_run(&self, run_id: Id) -> Result<Option<Run>>;
    async fn find_run(&self, location_id: Id, run_date: chrono::NaiveDate) -> Result<Option<Run>>;
    async fn set_run_status(
        &self,
        run_id: Id,
        status: RunStatus,
        ended_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;

    async fn insert_recording(&self, recording: &Recording) -> Result<()>;
    async fn get_recordings_for_run(&self, run_id: Id) -> Result<Vec<Recording>>;

    async fn upsert_transactions(&self, transactions: &[Transaction]) -> Result<()>;
    async fn get_transactions_for_run(&self, run_id: Id) -> Result<Vec<Transaction>>;
    async fn assign_worker(
        &self,
        transaction_id: Id,
        worker_id: Option<Id>,
        confidence: Option<f32>,
        source: WorkerAssignmentSource,
        processed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;

    async fn upsert_grades(&self, grades: &[Grade]) -> Result<()>;
    async fn get_grades_for_run(&self, run_id: Id) -> Result<Vec<Grade>>;

    async fn get_menu(&self, location_id: Id) -> Result<Menu>;
    async fn get_workers(&self, location_id: Id) -> Result<Vec<Worker>>;

    async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()>;
    async fn upsert_run_analytics_worker(&self, analytics: &RunAnalyticsWorker) -> Result<()>;
}

#[derive(Default)]
struct State {
    locations: HashMap<Id, Location>,
    runs: HashMap<Id, Run>,
    recordings: HashMap<Id, Vec<Recording>>,
    transactions: HashMap<Id, Transaction>,
    grades: HashMap<Id, Grade>,
    menus: HashMap<Id, Menu>,
    workers: HashMap<Id, Vec<Worker>>,
    run_analytics: HashMap<Id, RunAnalytics>,
    run_analytics_worker: HashMap<(Id, Id), RunAnalyticsWorker>,
}

/// In-memory Database, for tests and the `InMemoryDatabase::with_menu` fixtures.
#[derive(Default)]
pub struct InMemoryDatabase {
    state: Mutex<State>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_menu(self, location_id: Id, menu: Menu) -> Self {
        self.state.lock().unwrap().menus.insert(location_id, menu);
        self
    }

    pub fn with_workers(self, location_id: Id, workers: Vec<Worker>) -> Self {
        self.state.lock().unwrap().workers.insert(location_id, workers);
        self
    }

    pub fn with_location(self, location: Location) -> Self {
        self.state.lock().unwrap().locations.insert(location.id, location);
        self
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn upsert_location(&self, location: &Location) -> Result<()> {
        self.state.lock().unwrap().locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn get_location(&self, location_id: Id) -> Result<Option<Location>> {
        Ok(self.state.lock().unwrap().locations.get(&location_id).cloned())
    }

    async fn insert_run(&self, run: &Run) -> Result<()> {
        self.state.lock().unwrap().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Id) -> Result<Option<Run>> {
        Ok(self.state.lock().unwrap().runs.get(&run_id).cloned())
    }

    async fn find_run(&self, location_id: Id, run_date: chrono::NaiveDate) -> Result<Option<Run>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .values()
            .find(|r| r.location_id == location_id && r.run_date == run_date)
            .cloned())
    }

    async fn set_run_status(
        &self,
        run_id: Id,
        status: RunStatus,
        ended_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        if let Some(run) = self.state.lock().unwrap().runs.get_mut(&run_id) {
            run.status = status;
            if ended_at.is_some() {
                run.ended_at = ended_at;
            }
        }
        Ok(())
    }

    async fn insert_recording(&self, recording: &Recording) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .recordings
            .entry(recording.run_id)
            .or_default()
            .push(recording.clone());
        Ok(())
    }

    async fn get_recordings_for_run(&self, run_id: Id) -> Result<Vec<Recording>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .recordings
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for t in transactions {
            state.transactions.insert(t.id, t.clone());
        }
        Ok(())
    }

    async fn get_transactions_for_run(&self, run_id: Id) -> Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .state
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.started_at);
        Ok(out)
    }

    async fn assign_worker(
        &self,
        transaction_id: Id,
        worker_id: Option<Id>,
        confidence: Option<f32>,
        source: WorkerAssignmentSource,
        processed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        if let Some(t) = self.state.lock().unwrap().transactions.get_mut(&transaction_id) {
            t.worker_id = worker_id;
            t.worker_confidence = confidence;
            t.worker_assignment_source = source;
            t.voice_processed_at = Some(processed_at);
        }
        Ok(())
    }

    async fn upsert_grades(&self, grades: &[Grade]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for g in grades {
            state.grades.insert(g.transaction_id, g.clone());
        }
        Ok(())
    }

    async fn get_grades_for_run(&self, run_id: Id) -> Result<Vec<Grade>> {
        let transaction_ids: std::collections::HashSet<Id> = self
            .state
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|t| t.run_id == run_id)
            .map(|t| t.id)
            .collect();
        Ok(self
            .state
            .lock()
            .unwrap()
            .grades
            .values()
            .filter(|g| transaction_ids.contains(&g.transaction_id))
            .cloned()
            .collect())
    }

    async fn get_menu(&self, location_id: Id) -> Result<Menu> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .menus
            .get(&location_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_workers(&self, location_id: Id) -> Result<Vec<Worker>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workers
            .get(&location_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .run_analytics
            .insert(analytics.run_id, analytics.clone());
        Ok(())
    }

    async fn upsert_run_analytics_worker(&self, analytics: &RunAnalyticsWorker) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .run_analytics_worker
            .insert((analytics.run_id, analytics.worker_id), analytics.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn run_status_transitions() {
        let db = InMemoryDatabase::new();
        let run = Run {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            run_date: chrono::Utc::now().date_naive(),
            status: RunStatus::Uploading,
            started_at: chrono::Utc::now(),
            ended_at: None,
        };
        db.insert_run(&run).await.unwrap();
        db.set_run_status(run.id, RunStatus::Complete, Some(chrono::Utc::now()))
            .await
            .unwrap();
        let fetched = db.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Complete);
        assert!(fetched.ended_at.is_some());
    }

    #[tokio::test]
    async fn upsert_location_round_trips() {
        let db = InMemoryDatabase::new();
        let location = Location {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "Maple Street".to_string(),
            timezone: "America/Chicago".to_string(),
        };
        db.upsert_location(&location).await.unwrap();
        let fetched = db.get_location(location.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Maple Street");
    }

    #[tokio::test]
    async fn upsert_transactions_is_idempotent_by_id() {
        let db = InMemoryDatabase::new();
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
        db.upsert_transactions(&[t.clone(), t.clone()]).await.unwrap();
        let rows = db.get_transactions_for_run(run_id).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
