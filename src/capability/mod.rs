//! Capability traits (§6): the external collaborators the core consumes.
//!
//! Each capability is a named interface; real implementations can be swapped
//! for fakes in tests. The core owns no singletons.

mod blobstore;
mod database;
mod diarizer;
mod embedder;
mod fileshare;
mod reasoner;
mod sqlite_database;
mod vendor_asr;
mod vendor_diarizer;
mod vendor_embedder;
mod vendor_reasoner;

pub use blobstore::{to_jsonl_lines, BlobStore, LocalBlobStore};
pub use database::{Database, InMemoryDatabase};
pub use diarizer::{Diarizer, Utterance};
pub use embedder::{average_vectors, cosine_similarity, SpeakerEmbedder};
pub use fileshare::{FileEntry, FileShare, LocalFileShare, UploadRef};
pub use reasoner::{Reasoner, ReasonerOutput};
pub use sqlite_database::SqliteDatabase;
pub use vendor_asr::OpenAiAsr;
pub use vendor_diarizer::HttpDiarizer;
pub use vendor_embedder::HttpSpeakerEmbedder;
pub use vendor_reasoner::OpenAiReasoner;

use crate::error::Result;
use async_trait::async_trait;

/// Bytes in, timestamped text out.
#[async_trait]
pub trait Asr: Send + Sync {
    async fn transcribe(&self, wav_bytes: &[u8]) -> Result<String>;
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// A fake ASR returning a fixed string for every call.
    pub struct FakeAsr {
        pub fixed_text: String,
    }

    #[async_trait]
    impl Asr for FakeAsr {
        async fn transcribe(&self, _wav_bytes: &[u8]) -> Result<String> {
            Ok(self.fixed_text.clone())
        }
    }

    /// A fake Reasoner that returns scripted responses in call order.
    pub struct FakeReasoner {
        pub responses: Mutex<Vec<ReasonerOutput>>,
    }

    impl FakeReasoner {
        pub fn new(responses: Vec<ReasonerOutput>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Reasoner for FakeReasoner {
        async fn complete(
            &self,
            _prompt: &str,
            _effort: &str,
            _reasoning_summary: bool,
        ) -> Result<ReasonerOutput> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(ReasonerOutput {
                    text: String::new(),
                    input_tokens: 0,
                    output_tokens: 0,
                })
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    /// A fake Diarizer returning a fixed utterance list.
    pub struct FakeDiarizer {
        pub utterances: Vec<Utterance>,
    }

    #[async_trait]
    impl Diarizer for FakeDiarizer {
        async fn diarize(&self, _audio_path: &std::path::Path) -> Result<Vec<Utterance>> {
            Ok(self.utterances.clone())
        }
    }

    /// A fake SpeakerEmbedder mapping a path's file stem to a deterministic vector.
    pub struct FakeEmbedder {
        pub dimensions: usize,
    }

    #[async_trait]
    impl SpeakerEmbedder for FakeEmbedder {
        async fn embed(&self, wav_path: &std::path::Path) -> Result<Vec<f32>> {
            let seed: u64 = wav_path
                .to_string_lossy()
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            let mut v: Vec<f32> = (0..self.dimensions)
                .map(|i| (((seed.wrapping_add(i as u64)) % 997) as f32) - 498.0)
                .collect();
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in v.iter_mut() {
                    *x /= norm;
                }
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }
}
