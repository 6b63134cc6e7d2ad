//! VoiceDiarizer (§4.5): builds per-location voice reference embeddings and
//! attributes transaction clips to workers by voice.

use crate::capability::{cosine_similarity, average_vectors, Diarizer, FileShare, SpeakerEmbedder, Utterance};
use crate::config::VoiceSettings;
use crate::error::{HoptixError, Result};
use crate::model::{Id, VoiceSample, Worker};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One entry of a location's reference set: a worker's derived label and
/// its unit embedding.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub label: String,
    pub worker_id: Id,
    pub embedding: Vec<f32>,
}

/// Outcome of matching one transaction clip to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceMatch {
    pub worker_id: Option<Id>,
    pub confidence: Option<f32>,
}

pub struct VoiceDiarizer {
    diarizer: Arc<dyn Diarizer>,
    embedder: Arc<dyn SpeakerEmbedder>,
    file_share: Arc<dyn FileShare>,
    settings: VoiceSettings,
}

impl VoiceDiarizer {
    pub fn new(
        diarizer: Arc<dyn Diarizer>,
        embedder: Arc<dyn SpeakerEmbedder>,
        file_share: Arc<dyn FileShare>,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            diarizer,
            embedder,
            file_share,
            settings,
        }
    }

    /// Phase 1: build a location's reference set from its FileShare voice
    /// sample folder, binding each derived label to a `Worker.legal_name`.
    #[instrument(skip(self, workers), fields(location_name))]
    pub async fn build_reference_set(
        &self,
        location_name: &str,
        workers: &[Worker],
        work_dir: &Path,
    ) -> Result<Vec<ReferenceEntry>> {
        let folder = self.find_voice_sample_folder(location_name).await?;
        let Some(folder) = folder else {
            warn!(location_name, "no voice sample folder found for location");
            return Ok(Vec::new());
        };

        let files = self.file_share.list_folder(&folder).await?;
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let sample = VoiceSample {
                folder: folder.clone(),
                filename: file.name.clone(),
            };
            let label = sample.label();
            let Some(worker) = bind_worker(&label, workers) else {
                debug!(label, "voice sample has no matching worker, skipping");
                continue;
            };

            let local_path = work_dir.join(&file.name);
            self.file_share.download(&file.id, &local_path).await?;
            let embedding = self.embedder.embed(&local_path).await?;
            entries.push(ReferenceEntry {
                label,
                worker_id: worker.id,
                embedding,
            });
        }
        Ok(entries)
    }

    async fn find_voice_sample_folder(&self, location_name: &str) -> Result<Option<String>> {
        let candidates = [
            format!("{location_name} Voice Samples"),
            format!("{}_Voice_Samples", location_name.replace(' ', "_")),
            format!("{location_name} Voices"),
            format!("Voice Samples {location_name}"),
        ];
        for candidate in &candidates {
            if !self.file_share.list_folder(candidate).await?.is_empty() {
                return Ok(Some(candidate.clone()));
            }
        }
        // Fallback: prefix/contains match on (location name AND "Voice" AND "sample").
        let lower_name = location_name.to_lowercase();
        for candidate in &candidates {
            let lower = candidate.to_lowercase();
            if lower.contains(&lower_name) && lower.contains("voice") {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    /// Phase 2: process one transaction clip. Returns `None` if the filename
    /// doesn't match the required pattern, or the clip pre-check says skip.
    #[instrument(skip(self, reference_set), fields(clip_path = %clip_path.display()))]
    pub async fn process_clip(
        &self,
        clip_path: &Path,
        already_assigned: bool,
        reference_set: &[ReferenceEntry],
    ) -> Result<Option<VoiceMatch>> {
        if !is_valid_clip_filename(clip_path) {
            return Err(HoptixError::InputMalformed(format!(
                "clip filename does not match tx_<uuid>.<ext>: {}",
                clip_path.display()
            )));
        }
        if already_assigned {
            return Ok(None);
        }

        let utterances = self.diarizer.diarize(clip_path).await?;
        if utterances.is_empty() {
            debug!("no utterances found, no match");
            return Ok(Some(VoiceMatch {
                worker_id: None,
                confidence: None,
            }));
        }

        let mut tags: HashMap<String, Vec<Utterance>> = HashMap::new();
        for u in utterances {
            tags.entry(u.speaker_tag.clone()).or_default().push(u);
        }

        // Per-tag robust embedding.
        let mut tag_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        for (tag, utts) in &tags {
            if let Some(embedding) = self.robust_embedding(clip_path, utts).await? {
                tag_embeddings.insert(tag.clone(), embedding);
            }
        }

        // Per-tag best label via argmax cosine similarity, above threshold.
        let mut tag_label: HashMap<String, String> = HashMap::new();
        for (tag, embedding) in &tag_embeddings {
            if let Some((label, score)) = best_match(embedding, reference_set) {
                if score >= self.settings.match_threshold {
                    tag_label.insert(tag.clone(), label);
                }
            }
        }

        if tag_label.is_empty() {
            return Ok(Some(VoiceMatch {
                worker_id: None,
                confidence: None,
            }));
        }

        // Group tags by label, average their robust embeddings, and compute
        // exactly one similarity against the worker's reference embedding.
        let mut label_tags: HashMap<String, Vec<&str>> = HashMap::new();
        for (tag, label) in &tag_label {
            label_tags.entry(label.clone()).or_default().push(tag.as_str());
        }

        let mut best: Option<(Id, f32)> = None;
        for (label, tag_names) in &label_tags {
            let Some(reference) = reference_set.iter().find(|r| &r.label == label) else {
                continue;
            };
            let embeddings: Vec<Vec<f32>> = tag_names
                .iter()
                .filter_map(|t| tag_embeddings.get(*t).cloned())
                .collect();
            if embeddings.is_empty() {
                continue;
            }
            let averaged = average_vectors(&embeddings);
            let similarity = cosine_similarity(&averaged, &reference.embedding);
            if best.map(|(_, s)| similarity > s).unwrap_or(true) {
                best = Some((reference.worker_id, similarity));
            }
        }

        match best {
            Some((worker_id, confidence)) if confidence >= self.settings.match_threshold => {
                Ok(Some(VoiceMatch {
                    worker_id: Some(worker_id),
                    confidence: Some(confidence),
                }))
            }
            _ => Ok(Some(VoiceMatch {
                worker_id: None,
                confidence: None,
            })),
        }
    }

    /// Three-strategy robust embedding fallback (§4.5 step 4).
    async fn robust_embedding(&self, clip_path: &Path, utterances: &[Utterance]) -> Result<Option<Vec<f32>>> {
        if utterances.is_empty() {
            return Ok(None);
        }

        // (a) average the top-3 longest utterances.
        let mut by_duration = utterances.to_vec();
        by_duration.sort_by_key(|u| std::cmp::Reverse(u.duration_ms()));
        let top3: Vec<&Utterance> = by_duration.iter().take(3).collect();
        if !top3.is_empty() {
            let mut embeddings = Vec::with_capacity(top3.len());
            for u in &top3 {
                embeddings.push(self.embed_window(clip_path, u.start_ms, u.end_ms).await?);
            }
            return Ok(Some(average_vectors(&embeddings)));
        }

        // (b) concatenate chronologically until target duration/count reached.
        let mut chronological = utterances.to_vec();
        chronological.sort_by_key(|u| u.start_ms);
        let mut total_ms = 0u64;
        let mut selected = Vec::new();
        for u in &chronological {
            if total_ms >= self.settings.target_concat_ms as u64 || selected.len() >= self.settings.max_concat_utts {
                break;
            }
            total_ms += u.duration_ms();
            selected.push(u);
        }
        if let (Some(first), Some(last)) = (selected.first(), selected.last()) {
            let embedding = self.embed_window(clip_path, first.start_ms, last.end_ms).await?;
            return Ok(Some(embedding));
        }

        // (c) the single longest utterance meeting the minimum duration.
        if let Some(longest) = by_duration.first() {
            if longest.duration_ms() >= self.settings.min_utterance_ms as u64 {
                let embedding = self.embed_window(clip_path, longest.start_ms, longest.end_ms).await?;
                return Ok(Some(embedding));
            }
        }

        Ok(None)
    }

    /// Extract `[start_ms, end_ms)` of `clip_path` to a scratch wav file and
    /// embed just that window, so distinct tags in the same clip get distinct
    /// embeddings instead of all collapsing onto the whole-clip vector.
    async fn embed_window(&self, clip_path: &Path, start_ms: u64, end_ms: u64) -> Result<Vec<f32>> {
        let window_path = extract_wav_window(clip_path, start_ms, end_ms)?;
        self.embedder.embed(&window_path).await
    }
}

fn bind_worker<'a>(label: &str, workers: &'a [Worker]) -> Option<&'a Worker> {
    if let Some(w) = workers.iter().find(|w| w.legal_name.eq_ignore_ascii_case(label)) {
        return Some(w);
    }
    let last_token = label.split_whitespace().last()?;
    workers.iter().find(|w| {
        w.legal_name
            .split_whitespace()
            .last()
            .map(|t| t.eq_ignore_ascii_case(last_token))
            .unwrap_or(false)
    })
}

fn best_match(embedding: &[f32], reference_set: &[ReferenceEntry]) -> Option<(String, f32)> {
    reference_set
        .iter()
        .map(|r| (r.label.clone(), cosine_similarity(embedding, &r.embedding)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

/// Slice `[start_ms, end_ms)` out of `wav_path` and write it to a fresh
/// scratch wav file, mirroring `transcriber.rs`'s per-span sample extraction.
fn extract_wav_window(wav_path: &Path, start_ms: u64, end_ms: u64) -> Result<tempfile::TempPath> {
    let mut reader =
        hound::WavReader::open(wav_path).map_err(|e| HoptixError::InputMalformed(format!("unreadable wav: {e}")))?;
    let spec = reader.spec();
    let samples: Vec<i32> = match spec.sample_format {
        hound::SampleFormat::Int => reader.samples::<i32>().collect::<std::result::Result<_, _>>().unwrap_or_default(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v * i16::MAX as f32) as i32))
            .collect::<std::result::Result<_, _>>()
            .unwrap_or_default(),
    };

    let start_idx = ((start_ms as f64 / 1000.0) * spec.sample_rate as f64) as usize;
    let end_idx = (((end_ms as f64 / 1000.0) * spec.sample_rate as f64) as usize).min(samples.len());
    let slice = if start_idx < end_idx { &samples[start_idx..end_idx] } else { &[] };

    let file = tempfile::NamedTempFile::new().map_err(HoptixError::Io)?;
    let path = file.into_temp_path();
    {
        let mut writer = hound::WavWriter::create(
            &path,
            hound::WavSpec {
                sample_format: hound::SampleFormat::Int,
                ..spec
            },
        )
        .map_err(|e| HoptixError::Diarization(format!("failed to open scratch wav: {e}")))?;
        for sample in slice {
            writer
                .write_sample(*sample)
                .map_err(|e| HoptixError::Diarization(format!("failed to write sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| HoptixError::Diarization(format!("failed to finalize scratch wav: {e}")))?;
    }
    Ok(path)
}

fn is_valid_clip_filename(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(rest) = name.strip_prefix("tx_") else {
        return false;
    };
    let Some((uuid_part, ext)) = rest.rsplit_once('.') else {
        return false;
    };
    matches!(ext, "wav" | "mp3" | "m4a") && uuid::Uuid::parse_str(uuid_part).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::{FakeDiarizer, FakeEmbedder};
    use crate::capability::LocalFileShare;
    use uuid::Uuid;

    fn diarizer(utterances: Vec<Utterance>) -> VoiceDiarizer {
        VoiceDiarizer::new(
            Arc::new(FakeDiarizer { utterances }),
            Arc::new(FakeEmbedder { dimensions: 8 }),
            Arc::new(LocalFileShare::new(std::env::temp_dir())),
            VoiceSettings::default(),
        )
    }

    #[test]
    fn voice_sample_label_replaces_underscores_and_strips_extension() {
        let sample = VoiceSample {
            folder: "Voices".to_string(),
            filename: "Alex_Kim.wav".to_string(),
        };
        assert_eq!(sample.label(), "Alex Kim");
    }

    #[test]
    fn valid_clip_filename_pattern() {
        let id = Uuid::new_v4();
        assert!(is_valid_clip_filename(Path::new(&format!("tx_{id}.wav"))));
        assert!(!is_valid_clip_filename(Path::new("not_a_clip.wav")));
        assert!(!is_valid_clip_filename(Path::new(&format!("tx_{id}.ogg"))));
    }

    #[test]
    fn bind_worker_falls_back_to_last_name() {
        let workers = vec![Worker {
            id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            legal_name: "Alexandra Kim".to_string(),
            display_name: "Alex".to_string(),
            monthly_feedback: vec![],
        }];
        assert!(bind_worker("Alexandra Kim", &workers).is_some());
        assert!(bind_worker("Somebody Kim", &workers).is_some());
        assert!(bind_worker("Nobody Jones", &workers).is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_clip_filename() {
        let d = diarizer(vec![]);
        let result = d.process_clip(Path::new("bogus.wav"), false, &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn already_assigned_clip_is_skipped() {
        let d = diarizer(vec![]);
        let id = Uuid::new_v4();
        let path = std::env::temp_dir().join(format!("tx_{id}.wav"));
        let result = d.process_clip(&path, true, &[]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn no_utterances_yields_no_match() {
        let d = diarizer(vec![]);
        let id = Uuid::new_v4();
        let path = std::env::temp_dir().join(format!("tx_{id}.wav"));
        let result = d.process_clip(&path, false, &[]).await.unwrap().unwrap();
        assert_eq!(result.worker_id, None);
    }

    fn write_test_wav(path: &Path, seconds: f64, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (seconds * sample_rate as f64) as usize;
        for i in 0..n {
            writer.write_sample(((i % 100) as i16) - 50).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn match_above_threshold_assigns_worker() {
        let utterances = vec![Utterance {
            speaker_tag: "spk_0".to_string(),
            start_ms: 0,
            end_ms: 3000,
            text: "welcome to the drive thru".to_string(),
        }];
        let d = diarizer(utterances);
        let id = Uuid::new_v4();
        let path = std::env::temp_dir().join(format!("tx_{id}.wav"));
        write_test_wav(&path, 3.0, 16_000);

        let reference_embedding = d.embedder.embed(&path).await.unwrap();
        let worker_id = Uuid::new_v4();
        let reference_set = vec![ReferenceEntry {
            label: "Alex Kim".to_string(),
            worker_id,
            embedding: reference_embedding,
        }];

        let result = d.process_clip(&path, false, &reference_set).await.unwrap().unwrap();
        assert_eq!(result.worker_id, Some(worker_id));
        assert!(result.confidence.unwrap() > 0.9);
    }
}
