//! OpenAI-backed reference implementation of [`super::Asr`] (§6.4).

use super::Asr;
use crate::error::{HoptixError, Result};
use crate::openai::create_client_with_timeout;
use async_openai::types::{AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct OpenAiAsr {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiAsr {
    pub fn new(timeout_sec: u64) -> Self {
        Self::with_model("whisper-1", timeout_sec)
    }

    pub fn with_model(model: &str, timeout_sec: u64) -> Self {
        Self {
            client: create_client_with_timeout(Duration::from_secs(timeout_sec)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Asr for OpenAiAsr {
    #[instrument(skip(self, wav_bytes), fields(len = wav_bytes.len()))]
    async fn transcribe(&self, wav_bytes: &[u8]) -> Result<String> {
        debug!("Transcribing clip via Whisper");

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(async_openai::types::AudioInput::from_vec_u8(
                "clip.wav".to_string(),
                wav_bytes.to_vec(),
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::Json);

        let request = request_builder
            .build()
            .map_err(|e| HoptixError::Transcription(format!("failed to build request: {e}")))?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(|e| HoptixError::TransientExternal(format!("Whisper API error: {e}")))?;

        Ok(response.text)
    }
}
