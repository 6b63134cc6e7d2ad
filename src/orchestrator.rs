//! Orchestrator (§4.6): drives the full pipeline for one (location, date) run.

use crate::analytics::{self, GradedTransaction};
use crate::capability::{
    to_jsonl_lines, Asr, BlobStore, Database, Diarizer, FileShare, Reasoner, SpeakerEmbedder,
};
use crate::config::{Prompts, Settings};
use crate::diarization::VoiceDiarizer;
use crate::error::{HoptixError, Result};
use crate::extractor::TransactionExtractor;
use crate::grader::Grader;
use crate::menu_binder::MenuBinder;
use crate::model::{
    Grade, Id, Location, Recording, RecordingMeta, RecordingStatus, Run, RunStatus, Transaction,
    TransactionKind, TransactionMeta, WorkerAssignmentSource,
};
use crate::retry::{with_retry, CancellationToken};
use crate::splitter::{ChunkMedia, ChunkPlan, ChunkSpec, MediaSplitter};
use crate::transcriber::Transcriber;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// Outcome of a single `process()` call, for the CLI summary.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub transactions: usize,
    pub grades: usize,
    pub clips: usize,
    pub voice_matches: usize,
    pub voice_failures: usize,
}

/// A transaction awaiting grading, carrying the transcript text the
/// extractor produced (Transaction itself has no transcript field — that's
/// where Grade's own `transcript` comes from once graded).
#[derive(Debug, Clone)]
struct PendingTransaction {
    transaction: Transaction,
    transcript: String,
}

pub struct Orchestrator {
    settings: Settings,
    database: Arc<dyn Database>,
    blob_store: Arc<dyn BlobStore>,
    splitter: Arc<MediaSplitter>,
    transcriber: Arc<Transcriber>,
    extractor: Arc<TransactionExtractor>,
    menu_binder: Arc<MenuBinder>,
    grader: Arc<Grader>,
    diarizer: Arc<VoiceDiarizer>,
    cancellation: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        prompts: Prompts,
        database: Arc<dyn Database>,
        blob_store: Arc<dyn BlobStore>,
        file_share: Arc<dyn FileShare>,
        asr: Arc<dyn Asr>,
        reasoner: Arc<dyn Reasoner>,
        diarizer: Arc<dyn Diarizer>,
        embedder: Arc<dyn SpeakerEmbedder>,
    ) -> Self {
        let menu_binder = Arc::new(MenuBinder::new(database.clone()));
        let grader = Arc::new(Grader::new(
            reasoner.clone(),
            menu_binder.clone(),
            prompts.grader.clone(),
            settings.grading.clone(),
        ));
        let voice_diarizer = Arc::new(VoiceDiarizer::new(
            diarizer,
            embedder,
            file_share.clone(),
            settings.voice.clone(),
        ));
        let extractor = Arc::new(TransactionExtractor::new(
            reasoner,
            prompts.extractor.clone(),
            settings.grading.reasoning_effort.clone(),
        ));
        Self {
            splitter: Arc::new(MediaSplitter::new(settings.splitter.clone(), file_share.clone())),
            transcriber: Arc::new(Transcriber::new(asr)),
            extractor,
            menu_binder,
            grader,
            diarizer: voice_diarizer,
            database,
            blob_store,
            settings,
            cancellation: CancellationToken::new(),
        }
    }

    /// Cancellation signal shared by every external call this orchestrator makes.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// §4.6 `ingest`: create the Run, root Recording, and chunk Recordings
    /// from the splitter's plan. Idempotent on `(location_id, date)`.
    #[instrument(skip(self, source_path))]
    pub async fn ingest(
        &self,
        org_id: Id,
        location_id: Id,
        location_name: &str,
        run_date: chrono::NaiveDate,
        source_path: &std::path::Path,
    ) -> Result<Id> {
        let existing_location = self.database.get_location(location_id).await?;
        let timezone = existing_location.map(|l| l.timezone).unwrap_or_else(|| "UTC".to_string());
        self.database
            .upsert_location(&Location {
                id: location_id,
                org_id,
                name: location_name.to_string(),
                timezone,
            })
            .await?;

        if let Some(existing) = self.database.find_run(location_id, run_date).await? {
            info!(run_id = %existing.id, "found existing run for location/date, reusing");
            return Ok(existing.id);
        }

        let run_id = Id::new_v4();
        let started_at = chrono::Utc::now();
        let run = Run {
            id: run_id,
            org_id,
            location_id,
            run_date,
            status: RunStatus::Uploading,
            started_at,
            ended_at: None,
        };
        self.database.insert_run(&run).await?;

        let metadata = tokio::fs::metadata(source_path).await?;
        let duration_sec = probe_duration_sec(source_path).await?;

        let root_id = Id::new_v4();
        let root = Recording {
            id: root_id,
            run_id,
            location_id,
            started_at,
            ended_at: started_at + chrono::Duration::seconds(duration_sec as i64),
            object_key: source_path.to_string_lossy().to_string(),
            link: None,
            status: RecordingStatus::Uploaded,
            meta: RecordingMeta::default(),
        };
        self.database.insert_recording(&root).await?;

        let plan = self.splitter.plan(duration_sec, metadata.len());
        for chunk in &plan.chunks {
            let chunk_recording = Recording {
                id: Id::new_v4(),
                run_id,
                location_id,
                started_at: started_at + chrono::Duration::seconds(chunk.start_sec as i64),
                ended_at: started_at + chrono::Duration::seconds(chunk.end_sec as i64),
                object_key: root.object_key.clone(),
                link: None,
                status: RecordingStatus::Pending,
                meta: RecordingMeta {
                    is_chunk: true,
                    original_id: Some(root_id),
                    chunk_index: Some(chunk.index),
                    chunk_start_sec: Some(chunk.start_sec),
                    chunk_end_sec: Some(chunk.end_sec),
                    overlap_sec: Some(chunk.overlap_sec),
                },
            };
            self.database.insert_recording(&chunk_recording).await?;
        }

        self.database.set_run_status(run_id, RunStatus::Processing, None).await?;
        Ok(run_id)
    }

    /// §4.6 `process`: the three pipeline phases for one run.
    #[instrument(skip(self))]
    pub async fn process(&self, run_id: Id, source_path: &std::path::Path, work_dir: &std::path::Path) -> Result<ProcessResult> {
        let run = self
            .database
            .get_run(run_id)
            .await?
            .ok_or_else(|| HoptixError::InvalidInput(format!("no run {run_id}")))?;

        let recordings = self.database.get_recordings_for_run(run_id).await?;
        let root = recordings
            .iter()
            .find(|r| !r.meta.is_chunk)
            .ok_or_else(|| HoptixError::InvalidInput("run has no root recording".to_string()))?;
        let mut chunk_recordings: Vec<&Recording> = recordings.iter().filter(|r| r.meta.is_chunk).collect();
        chunk_recordings.sort_by_key(|r| r.meta.chunk_index.unwrap_or(0));
        if chunk_recordings.is_empty() {
            chunk_recordings.push(root);
        }

        let root_duration_sec = (root.ended_at - root.started_at).num_seconds() as f64;
        let plan = ChunkPlan {
            chunks: chunk_recordings
                .iter()
                .enumerate()
                .map(|(i, r)| ChunkSpec {
                    index: r.meta.chunk_index.unwrap_or(i as u32),
                    start_sec: r.meta.chunk_start_sec.unwrap_or(0.0),
                    end_sec: r.meta.chunk_end_sec.unwrap_or(root_duration_sec),
                    overlap_sec: r.meta.overlap_sec.unwrap_or(0.0),
                })
                .collect(),
        };
        let chunk_dir = work_dir.join("chunks");
        let chunk_media = self.splitter.cut(source_path, &plan, &chunk_dir).await?;

        let pending = self.phase_transactions(run_id, root.id, root.started_at, &chunk_media).await;
        let transactions: Vec<Transaction> = pending.iter().map(|p| p.transaction.clone()).collect();
        self.database.upsert_transactions(&transactions).await?;

        let grades = self.phase_grading(run.location_id, &pending).await;
        self.database.upsert_grades(&grades).await?;

        let (clip_count, matches, failures) = self
            .phase_clips_and_diarization(&run, source_path, &transactions, work_dir)
            .await?;

        Ok(ProcessResult {
            transactions: transactions.len(),
            grades: grades.len(),
            clips: clip_count,
            voice_matches: matches,
            voice_failures: failures,
        })
    }

    /// Phase 1: bounded-parallel chunk → Transcriber → TransactionExtractor → Transactions.
    async fn phase_transactions(
        &self,
        run_id: Id,
        recording_id: Id,
        root_started_at: chrono::DateTime<chrono::Utc>,
        chunks: &[ChunkMedia],
    ) -> Vec<PendingTransaction> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.chunk_parallelism));
        let mut tasks = JoinSet::new();

        #[allow(clippy::unnecessary_to_owned)]
        for chunk in chunks.iter().cloned() {
            let semaphore = semaphore.clone();
            let splitter = self.splitter.clone();
            let transcriber = self.transcriber.clone();
            let extractor = self.extractor.clone();
            let retry_settings = self.settings.retry.clone();
            let token = self.cancellation.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                process_chunk(
                    &splitter,
                    &transcriber,
                    &extractor,
                    &retry_settings,
                    &token,
                    &chunk,
                    run_id,
                    recording_id,
                    root_started_at,
                )
                .await
            });
        }

        let mut all = Vec::new();
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Ok(txs)) => all.extend(txs),
                Ok(Err(e)) => warn!("chunk processing failed: {e}"),
                Err(e) => warn!("chunk task panicked: {e}"),
            }
        }
        all.sort_by_key(|p| p.transaction.started_at);
        all
    }

    /// Phase 2: partition into `grade_batches` and grade each batch in parallel.
    async fn phase_grading(&self, location_id: Id, pending: &[PendingTransaction]) -> Vec<Grade> {
        let batches = self.settings.concurrency.grade_batches.max(1);
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.grade_parallelism));
        let mut tasks = JoinSet::new();

        for batch in partition(pending, batches) {
            let semaphore = semaphore.clone();
            let grader = self.grader.clone();
            let retry_settings = self.settings.retry.clone();
            let token = self.cancellation.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let mut grades = Vec::with_capacity(batch.len());
                for p in &batch {
                    let result = with_retry(&retry_settings, &token, || {
                        grader.grade(p.transaction.id, location_id, &p.transcript, &p.transaction.meta)
                    })
                    .await;
                    match result {
                        Ok(g) => grades.push(g),
                        Err(e) => warn!(transaction_id = %p.transaction.id, "grading failed: {e}"),
                    }
                }
                grades
            });
        }

        let mut all = Vec::new();
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(grades) => all.extend(grades),
                Err(e) => warn!("grade task panicked: {e}"),
            }
        }
        all
    }

    /// Phase 3: clip each transaction from the root timeline and run diarization.
    async fn phase_clips_and_diarization(
        &self,
        run: &Run,
        source_path: &std::path::Path,
        transactions: &[Transaction],
        work_dir: &std::path::Path,
    ) -> Result<(usize, usize, usize)> {
        let root_started_at = transactions.first().map(|t| t.started_at).unwrap_or_else(chrono::Utc::now);
        let ranges: Vec<(Id, f64, f64)> = transactions
            .iter()
            .map(|t| {
                let start = (t.started_at - root_started_at).num_milliseconds() as f64 / 1000.0;
                let end = (t.ended_at - root_started_at).num_milliseconds() as f64 / 1000.0;
                (t.id, start.max(0.0), end.max(start))
            })
            .collect();

        let clip_dir = work_dir.join("clips");
        let clips = self.splitter.clip(source_path, &ranges, run.run_date, &clip_dir).await?;

        let workers = self.database.get_workers(run.location_id).await?;
        let location_name = self
            .database
            .get_location(run.location_id)
            .await?
            .map(|l| l.name)
            .unwrap_or_else(|| {
                warn!(location_id = %run.location_id, "no location row found, falling back to id for voice-sample lookup");
                run.location_id.to_string()
            });
        let reference_set = self
            .diarizer
            .build_reference_set(&location_name, &workers, work_dir)
            .await
            .unwrap_or_default();

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.voice_parallelism));
        let mut tasks = JoinSet::new();
        for clip in clips.clone() {
            let semaphore = semaphore.clone();
            let diarizer = self.diarizer.clone();
            let database = self.database.clone();
            let reference_set = reference_set.clone();
            let already_assigned = transactions
                .iter()
                .find(|t| t.id == clip.transaction_id)
                .map(|t| t.worker_id.is_some())
                .unwrap_or(false);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let local_path = std::path::PathBuf::from(&clip.link);
                match diarizer.process_clip(&local_path, already_assigned, &reference_set).await {
                    Ok(Some(m)) => {
                        let _ = database
                            .assign_worker(clip.transaction_id, m.worker_id, m.confidence, WorkerAssignmentSource::Voice, chrono::Utc::now())
                            .await;
                        m.worker_id.is_some()
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!(transaction_id = %clip.transaction_id, "voice diarization failed: {e}");
                        false
                    }
                }
            });
        }

        let mut matches = 0;
        let mut failures = 0;
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(true) => matches += 1,
                Ok(false) => failures += 1,
                Err(e) => {
                    warn!("voice task panicked: {e}");
                    failures += 1;
                }
            }
        }
        Ok((clips.len(), matches, failures))
    }

    /// §4.6 `finalize`: recompute RunAnalytics/RunAnalyticsWorker and set the
    /// terminal Run status.
    #[instrument(skip(self))]
    pub async fn finalize(&self, run_id: Id) -> Result<()> {
        let run = self
            .database
            .get_run(run_id)
            .await?
            .ok_or_else(|| HoptixError::InvalidInput(format!("no run {run_id}")))?;

        let grades = self.database.get_grades_for_run(run_id).await?;
        let transactions = self.database.get_transactions_for_run(run_id).await?;
        let menu = self.menu_binder.load_menu(run.location_id).await;
        let workers = self.database.get_workers(run.location_id).await?;

        let bucket = format!("run={run_id}");
        if let Ok(lines) = to_jsonl_lines(&grades) {
            if let Err(e) = self.blob_store.put_jsonl_lines(&bucket, "grades.jsonl", lines).await {
                warn!("failed to archive grades for run {run_id}: {e}");
            }
        }
        if let Ok(lines) = to_jsonl_lines(&transactions) {
            if let Err(e) = self.blob_store.put_jsonl_lines(&bucket, "transactions.jsonl", lines).await {
                warn!("failed to archive transactions for run {run_id}: {e}");
            }
        }

        let run_analytics = analytics::aggregate_run_for(run_id, &grades, &menu);
        self.database.upsert_run_analytics(&run_analytics).await?;

        let graded_transactions: Vec<GradedTransaction> = transactions
            .iter()
            .filter_map(|t| {
                grades
                    .iter()
                    .find(|g| g.transaction_id == t.id)
                    .map(|g| GradedTransaction {
                        grade: g.clone(),
                        started_at: t.started_at,
                        worker_id: t.worker_id,
                    })
            })
            .collect();

        for worker_analytics in analytics::operator_analytics(run_id, &graded_transactions, &workers, &menu) {
            self.database.upsert_run_analytics_worker(&worker_analytics).await?;
        }

        self.database
            .set_run_status(run_id, RunStatus::Complete, Some(chrono::Utc::now()))
            .await?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_chunk(
    splitter: &MediaSplitter,
    transcriber: &Transcriber,
    extractor: &TransactionExtractor,
    retry_settings: &crate::config::RetrySettings,
    token: &CancellationToken,
    chunk: &ChunkMedia,
    run_id: Id,
    recording_id: Id,
    root_started_at: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<PendingTransaction>> {
    let spans = with_retry(retry_settings, token, || async { splitter.detect_transactions(&chunk.path) }).await?;
    let segments = with_retry(retry_settings, token, || transcriber.transcribe_chunk(&chunk.path, &spans)).await?;

    let mut out = Vec::new();
    for segment in &segments {
        let extracted = with_retry(retry_settings, token, || extractor.extract(segment)).await?;
        for tx in extracted {
            let started_at = root_started_at + chrono::Duration::milliseconds(((chunk.start_sec + tx.start_sec) * 1000.0) as i64);
            let ended_at = root_started_at + chrono::Duration::milliseconds(((chunk.start_sec + tx.end_sec) * 1000.0) as i64);
            out.push(PendingTransaction {
                transaction: Transaction {
                    id: Id::new_v4(),
                    run_id,
                    recording_id,
                    started_at,
                    ended_at,
                    kind: TransactionKind::Order,
                    meta: TransactionMeta {
                        complete_order: tx.complete_order,
                        mobile_order: tx.mobile_order,
                        coupon_used: tx.coupon_used,
                        asked_more_time: tx.asked_more_time,
                        out_of_stock_items: tx.out_of_stock_items,
                    },
                    clip_ref: None,
                    worker_id: None,
                    worker_confidence: None,
                    worker_assignment_source: WorkerAssignmentSource::Unassigned,
                    voice_processed_at: None,
                },
                transcript: tx.text,
            });
        }
    }
    Ok(out)
}

fn partition<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let chunk_size = items.len().div_ceil(n);
    items.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect()
}

async fn probe_duration_sec(path: &std::path::Path) -> Result<f64> {
    let output = tokio::process::Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .output()
        .await
        .map_err(|e| HoptixError::PermanentExternal(format!("failed to spawn ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(HoptixError::InputMalformed(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .map_err(|e| HoptixError::InputMalformed(format!("unparseable ffprobe duration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::{FakeAsr, FakeDiarizer, FakeEmbedder, FakeReasoner};
    use crate::capability::{InMemoryDatabase, LocalBlobStore, LocalFileShare, ReasonerOutput};

    fn orchestrator(reasoner_responses: Vec<ReasonerOutput>) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let database: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());
        let blob_store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));
        let file_share: Arc<dyn FileShare> = Arc::new(LocalFileShare::new(dir.path().join("files")));
        let asr: Arc<dyn Asr> = Arc::new(FakeAsr {
            fixed_text: "welcome to the drive thru".to_string(),
        });
        let reasoner: Arc<dyn Reasoner> = Arc::new(FakeReasoner::new(reasoner_responses));
        let diarizer: Arc<dyn Diarizer> = Arc::new(FakeDiarizer { utterances: vec![] });
        let embedder: Arc<dyn SpeakerEmbedder> = Arc::new(FakeEmbedder { dimensions: 8 });

        let orchestrator = Orchestrator::new(settings, Prompts::default(), database, blob_store, file_share, asr, reasoner, diarizer, embedder);
        (orchestrator, dir)
    }

    #[test]
    fn partition_splits_into_at_most_n_batches() {
        let items: Vec<u32> = (0..11).collect();
        let batches = partition(&items, 5);
        assert!(batches.len() <= 5);
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 11);
    }

    #[test]
    fn partition_empty_yields_no_batches() {
        let batches = partition::<u32>(&[], 5);
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn ingest_is_idempotent_for_same_location_and_date() {
        let (orchestrator, dir) = orchestrator(vec![]);
        let source = dir.path().join("missing.wav");
        tokio::fs::write(&source, b"not really audio").await.unwrap();
        // ffprobe will fail against a non-media file; ingest should surface that as an error
        // rather than silently accepting bogus duration.
        let result = orchestrator
            .ingest(Id::new_v4(), Id::new_v4(), "Test Location", chrono::Utc::now().date_naive(), &source)
            .await;
        assert!(result.is_err());
    }
}
