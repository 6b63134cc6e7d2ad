//! `reqwest`-based reference implementation of [`super::Diarizer`] (§6.4).
//!
//! No first-party OpenAI endpoint exists for diarization; this client talks
//! to a generic REST endpoint at a configurable base URL, matching the
//! vendor-capability style of the rest of the stack.

use super::{Diarizer, Utterance};
use crate::error::{HoptixError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

pub struct HttpDiarizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDiarizer {
    pub fn new(base_url: impl Into<String>, timeout_sec: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("failed to build diarizer HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct DiarizeResponseUtterance {
    speaker_tag: String,
    start_ms: u64,
    end_ms: u64,
    text: String,
}

#[derive(Deserialize)]
struct DiarizeResponse {
    utterances: Vec<DiarizeResponseUtterance>,
}

#[async_trait]
impl Diarizer for HttpDiarizer {
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn diarize(&self, audio_path: &std::path::Path) -> Result<Vec<Utterance>> {
        let bytes = tokio::fs::read(audio_path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name("clip.wav");
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(format!("{}/diarize", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| HoptixError::TransientExternal(format!("diarizer request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HoptixError::PermanentExternal(format!(
                "diarizer returned status {}",
                response.status()
            )));
        }

        let parsed: DiarizeResponse = response
            .json()
            .await
            .map_err(|e| HoptixError::InputMalformed(format!("bad diarizer response: {e}")))?;

        Ok(parsed
            .utterances
            .into_iter()
            .map(|u| Utterance {
                speaker_tag: u.speaker_tag,
                start_ms: u.start_ms,
                end_ms: u.end_ms,
                text: u.text,
            })
            .collect())
    }
}
