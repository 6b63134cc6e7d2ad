//! Subcommand implementations for the `hoptix` binary.

use crate::capability::{
    BlobStore, Database, HttpDiarizer, HttpSpeakerEmbedder, LocalBlobStore, LocalFileShare,
    OpenAiAsr, OpenAiReasoner, SqliteDatabase,
};
use crate::cli::Output;
use crate::config::{Prompts, Settings};
use crate::error::{HoptixError, Result};
use crate::orchestrator::Orchestrator;
use std::sync::Arc;

/// Runs the full pipeline (ingest → process → finalize) for one location/date.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    org_id: &str,
    location_id: &str,
    location_name: &str,
    date: &str,
    workers: Option<usize>,
    source: Option<String>,
    mut settings: Settings,
) -> Result<()> {
    let org_id = uuid::Uuid::parse_str(org_id).map_err(|e| HoptixError::InvalidInput(format!("bad org id: {e}")))?;
    let location_id =
        uuid::Uuid::parse_str(location_id).map_err(|e| HoptixError::InvalidInput(format!("bad location id: {e}")))?;
    let run_date = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| HoptixError::InvalidInput(format!("bad date: {e}")))?;

    if let Some(n) = workers {
        settings.concurrency.chunk_parallelism = n;
        settings.concurrency.grade_parallelism = n;
        settings.concurrency.voice_parallelism = n;
    }

    let source_path = source
        .map(std::path::PathBuf::from)
        .ok_or_else(|| HoptixError::InvalidInput("--source is required".to_string()))?;

    std::fs::create_dir_all(settings.blob_root())?;
    std::fs::create_dir_all(settings.file_share_root())?;

    let prompts = Prompts::load(None, None)?;
    let database: Arc<dyn Database> = Arc::new(SqliteDatabase::new(&settings.database_path())?);
    let blob_store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(settings.blob_root()));
    let file_share = Arc::new(LocalFileShare::new(settings.file_share_root()));
    let asr = Arc::new(OpenAiAsr::new(settings.concurrency.asr_timeout_sec));
    let reasoner = Arc::new(OpenAiReasoner::new(settings.concurrency.reasoner_timeout_sec));
    let diarizer = Arc::new(HttpDiarizer::new(
        settings.storage.vendor_base_url.clone(),
        settings.concurrency.diarizer_timeout_sec,
    ));
    let embedder = Arc::new(HttpSpeakerEmbedder::new(
        settings.storage.vendor_base_url.clone(),
        settings.voice.embedding_dimensions,
        settings.concurrency.embedder_timeout_sec,
    ));

    let orchestrator = Orchestrator::new(
        settings.clone(),
        prompts,
        database,
        blob_store,
        file_share,
        asr,
        reasoner,
        diarizer,
        embedder,
    );

    Output::header("ingest");
    let run_id = orchestrator
        .ingest(org_id, location_id, location_name, run_date, &source_path)
        .await?;
    Output::kv("run_id", &run_id.to_string());

    Output::header("process");
    let work_dir = settings.temp_dir().join(run_id.to_string());
    let result = orchestrator.process(run_id, &source_path, &work_dir).await?;
    Output::kv("transactions", &result.transactions.to_string());
    Output::kv("grades", &result.grades.to_string());
    Output::kv("clips", &result.clips.to_string());
    Output::kv("voice matches", &result.voice_matches.to_string());
    Output::kv("voice failures", &result.voice_failures.to_string());

    Output::header("finalize");
    orchestrator.finalize(run_id).await?;
    Output::success(&format!("run {run_id} complete"));

    Ok(())
}
