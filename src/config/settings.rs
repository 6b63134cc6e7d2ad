//! Configuration settings for the pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub splitter: SplitterSettings,
    pub grading: GradingSettings,
    pub voice: VoiceSettings,
    pub concurrency: ConcurrencySettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data (SQLite database, etc.).
    pub data_dir: String,
    /// Directory for scratch/temporary files (clip and chunk staging).
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.hoptix".to_string(),
            temp_dir: "/tmp/hoptix".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// MediaSplitter thresholds (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterSettings {
    /// Target chunk duration in seconds.
    pub target_chunk_sec: u32,
    /// Overlap between consecutive chunks, in seconds.
    pub overlap_sec: u32,
    /// Splitting triggers when the source exceeds this size.
    pub max_size_bytes: u64,
    /// Splitting triggers when the source exceeds this duration.
    pub max_duration_sec: u32,
    /// Window width for the silence detector.
    pub silence_window_sec: u32,
    /// Mean-absolute-amplitude threshold below which a window counts as silent.
    ///
    /// The original implementation tested `mean == 0.0` exactly. This crate
    /// preserves that boundary semantics (silence→active opens a transaction,
    /// active→silence closes one) but compares against a small epsilon instead
    /// of bit-exact zero, since re-encoded audio rarely produces an exact zero
    /// mean even in true silence.
    pub silence_epsilon: f64,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            target_chunk_sec: 1200,
            overlap_sec: 5,
            max_size_bytes: 50 * 1024 * 1024,
            max_duration_sec: 1800,
            silence_window_sec: 7,
            silence_epsilon: 0.0,
        }
    }
}

/// Grader / Reasoner pricing settings (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
    /// Reasoning effort passed to the Reasoner for Prompt-B.
    pub reasoning_effort: String,
    /// Price per input token, in dollars.
    pub price_per_input_token: f64,
    /// Price per output token, in dollars.
    pub price_per_output_token: f64,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            reasoning_effort: "high".to_string(),
            // One concrete instance of the configurable rate, matching the
            // pricing the original grader used for its reasoning model.
            price_per_input_token: 2.0 / 1000.0,
            price_per_output_token: 8.0 / 1000.0,
        }
    }
}

/// VoiceDiarizer thresholds (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Minimum cosine similarity for a tag→label match to count.
    pub match_threshold: f32,
    /// Target duration, in ms, for the concatenation fallback strategy.
    pub target_concat_ms: u32,
    /// Max utterances folded into the concatenation fallback strategy.
    pub max_concat_utts: usize,
    /// Minimum utterance duration, in ms, eligible for the single-longest fallback.
    pub min_utterance_ms: u32,
    /// Embedding dimensionality produced by the SpeakerEmbedder.
    pub embedding_dimensions: usize,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            match_threshold: 0.2,
            target_concat_ms: 8000,
            max_concat_utts: 6,
            min_utterance_ms: 1000,
            embedding_dimensions: 192,
        }
    }
}

/// Worker-pool sizes and the global job deadline (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    pub chunk_parallelism: usize,
    pub grade_parallelism: usize,
    pub voice_parallelism: usize,
    pub grade_batches: usize,
    pub max_job_duration_sec: u64,
    pub asr_timeout_sec: u64,
    pub reasoner_timeout_sec: u64,
    pub embedder_timeout_sec: u64,
    pub diarizer_timeout_sec: u64,
    pub storage_timeout_sec: u64,
    /// Minimum fraction of a phase's tasks that must succeed for the phase
    /// to be considered successful (default 0: partial success allowed).
    pub min_completed_fraction: f64,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            chunk_parallelism: 5,
            grade_parallelism: 5,
            voice_parallelism: 5,
            grade_batches: 5,
            max_job_duration_sec: 21_600,
            asr_timeout_sec: 300,
            reasoner_timeout_sec: 300,
            embedder_timeout_sec: 120,
            diarizer_timeout_sec: 300,
            storage_timeout_sec: 30,
            min_completed_fraction: 0.0,
        }
    }
}

/// Retry policy applied to every external call (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 1000,
            max_delay_ms: 15_000,
        }
    }
}

/// Local filesystem roots backing the BlobStore/FileShare/Database reference
/// implementations (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory for the BlobStore reference implementation.
    pub blob_root: String,
    /// Root directory for the FileShare reference implementation.
    pub file_share_root: String,
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Base URL for the Diarizer/SpeakerEmbedder HTTP capability.
    pub vendor_base_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            blob_root: "~/.hoptix/blobs".to_string(),
            file_share_root: "~/.hoptix/files".to_string(),
            database_path: "~/.hoptix/hoptix.db".to_string(),
            vendor_base_url: "http://localhost:8088".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::HoptixError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hoptix")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    pub fn blob_root(&self) -> PathBuf {
        Self::expand_path(&self.storage.blob_root)
    }

    pub fn file_share_root(&self) -> PathBuf {
        Self::expand_path(&self.storage.file_share_root)
    }

    pub fn database_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.splitter.target_chunk_sec, 1200);
        assert_eq!(s.splitter.overlap_sec, 5);
        assert_eq!(s.splitter.silence_window_sec, 7);
        assert_eq!(s.voice.match_threshold, 0.2);
        assert_eq!(s.concurrency.chunk_parallelism, 5);
        assert_eq!(s.concurrency.grade_parallelism, 5);
        assert_eq!(s.concurrency.voice_parallelism, 5);
        assert_eq!(s.concurrency.max_job_duration_sec, 21_600);
    }

    #[test]
    fn round_trips_through_toml() {
        let s = Settings::default();
        let toml_str = toml::to_string_pretty(&s).unwrap();
        let parsed: Settings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.splitter.target_chunk_sec, s.splitter.target_chunk_sec);
    }

    #[test]
    fn missing_config_file_falls_back_to_default() {
        let settings = Settings::load_from(Some(&PathBuf::from("/nonexistent/path/config.toml"))).unwrap();
        assert_eq!(settings.splitter.overlap_sec, 5);
    }
}
