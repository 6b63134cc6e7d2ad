//! Diarizer capability (§6.4): audio → utterances with anonymous speaker tags.

use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Utterance {
    pub speaker_tag: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl Utterance {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn diarize(&self, audio_path: &std::path::Path) -> Result<Vec<Utterance>>;
}
