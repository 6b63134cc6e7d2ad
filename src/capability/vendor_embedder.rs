//! `reqwest`-based reference implementation of [`super::SpeakerEmbedder`] (§6.4).

use super::SpeakerEmbedder;
use crate::error::{HoptixError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

pub struct HttpSpeakerEmbedder {
    client: reqwest::Client,
    base_url: String,
    dimensions: usize,
}

impl HttpSpeakerEmbedder {
    pub fn new(base_url: impl Into<String>, dimensions: usize, timeout_sec: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("failed to build embedder HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            dimensions,
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl SpeakerEmbedder for HttpSpeakerEmbedder {
    #[instrument(skip(self), fields(wav_path = %wav_path.display()))]
    async fn embed(&self, wav_path: &std::path::Path) -> Result<Vec<f32>> {
        let bytes = tokio::fs::read(wav_path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name("clip.wav");
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| HoptixError::TransientExternal(format!("embedder request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HoptixError::PermanentExternal(format!(
                "embedder returned status {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| HoptixError::InputMalformed(format!("bad embedder response: {e}")))?;

        Ok(parsed.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
