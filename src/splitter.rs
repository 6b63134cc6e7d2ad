//! MediaSplitter (§4.1): cuts a long recording into chunks and, via silence
//! detection, into per-transaction clips.

use crate::capability::FileShare;
use crate::config::SplitterSettings;
use crate::error::{HoptixError, Result};
use crate::model::Id;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One entry of a [`ChunkPlan`]: a time-bounded slice of the root recording.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpec {
    pub index: u32,
    pub start_sec: f64,
    pub end_sec: f64,
    pub overlap_sec: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    pub chunks: Vec<ChunkSpec>,
}

/// A chunk re-encoded to mono 16 kHz WAV on local disk.
#[derive(Debug, Clone)]
pub struct ChunkMedia {
    pub index: u32,
    pub path: PathBuf,
    pub start_sec: f64,
    pub end_sec: f64,
}

/// A written, uploaded per-transaction clip.
#[derive(Debug, Clone)]
pub struct ClipRef {
    pub transaction_id: Id,
    pub file_id: String,
    pub link: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

pub struct MediaSplitter {
    settings: SplitterSettings,
    file_share: Arc<dyn FileShare>,
}

impl MediaSplitter {
    pub fn new(settings: SplitterSettings, file_share: Arc<dyn FileShare>) -> Self {
        Self { settings, file_share }
    }

    /// Build a [`ChunkPlan`] for a recording of the given duration and size.
    ///
    /// No splitting is needed (a single whole-recording chunk) unless the
    /// source exceeds `MaxSizeBytes` or `MaxDurationSec`.
    pub fn plan(&self, duration_sec: f64, size_bytes: u64) -> ChunkPlan {
        if size_bytes <= self.settings.max_size_bytes && duration_sec <= self.settings.max_duration_sec as f64 {
            return ChunkPlan {
                chunks: vec![ChunkSpec {
                    index: 0,
                    start_sec: 0.0,
                    end_sec: duration_sec,
                    overlap_sec: 0.0,
                }],
            };
        }

        let target = self.settings.target_chunk_sec as f64;
        let overlap = self.settings.overlap_sec as f64;
        let stride = (target - overlap).max(1.0);

        let mut chunks = Vec::new();
        let mut index = 0u32;
        let mut start = 0.0f64;
        while start < duration_sec {
            let end = (start + target).min(duration_sec);
            let this_overlap = if end < duration_sec { overlap } else { 0.0 };
            chunks.push(ChunkSpec {
                index,
                start_sec: start,
                end_sec: end,
                overlap_sec: this_overlap,
            });
            if end >= duration_sec {
                break;
            }
            start += stride;
            index += 1;
        }
        ChunkPlan { chunks }
    }

    /// Re-encode each planned chunk to mono 16 kHz WAV under `work_dir`.
    #[instrument(skip(self, plan), fields(source = %source_path.display(), chunks = plan.chunks.len()))]
    pub async fn cut(
        &self,
        source_path: &Path,
        plan: &ChunkPlan,
        work_dir: &Path,
    ) -> Result<Vec<ChunkMedia>> {
        tokio::fs::create_dir_all(work_dir).await?;
        let mut out = Vec::with_capacity(plan.chunks.len());
        for chunk in &plan.chunks {
            let dest = work_dir.join(format!("chunk_{:04}.wav", chunk.index));
            reencode_segment(source_path, &dest, chunk.start_sec, chunk.end_sec - chunk.start_sec).await?;
            out.push(ChunkMedia {
                index: chunk.index,
                path: dest,
                start_sec: chunk.start_sec,
                end_sec: chunk.end_sec,
            });
        }
        Ok(out)
    }

    /// Scan a mono WAV file for active spans separated by silence (§4.1).
    ///
    /// Non-overlapping `SilenceWindowSec` windows are tested against
    /// `SilenceEpsilon`; silence→active opens a span, active→silence closes
    /// one, and an open span at end-of-stream is closed there.
    #[instrument(skip(self), fields(wav_path = %wav_path.display()))]
    pub fn detect_transactions(&self, wav_path: &Path) -> Result<Vec<(f64, f64)>> {
        let mut reader = hound::WavReader::open(wav_path)
            .map_err(|e| HoptixError::InputMalformed(format!("unreadable wav: {e}")))?;
        let spec = reader.spec();
        let sample_rate = spec.sample_rate as f64;

        let samples: Vec<f64> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64).unwrap_or(0.0))
                .collect(),
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| v as f64).unwrap_or(0.0))
                .collect(),
        };

        Ok(detect_spans(
            &samples,
            sample_rate,
            self.settings.silence_window_sec,
            self.settings.silence_epsilon,
        ))
    }

    /// Extract clips for each `(transaction_id, start_sec, end_sec)` range
    /// from `source_path` (root-recording timeline) and upload each to the
    /// `Clips_<MM-DD>` folder for `run_date`.
    #[instrument(skip(self, ranges), fields(source = %source_path.display(), count = ranges.len()))]
    pub async fn clip(
        &self,
        source_path: &Path,
        ranges: &[(Id, f64, f64)],
        run_date: chrono::NaiveDate,
        work_dir: &Path,
    ) -> Result<Vec<ClipRef>> {
        tokio::fs::create_dir_all(work_dir).await?;
        let folder = format!("Clips_{}", run_date.format("%m-%d"));
        let mut out = Vec::with_capacity(ranges.len());
        for (transaction_id, start, end) in ranges {
            let file_name = format!("tx_{}.wav", transaction_id);
            let local_path = work_dir.join(&file_name);
            reencode_segment(source_path, &local_path, *start, end - start).await?;
            let uploaded = self.file_share.upload(&local_path, &folder, &file_name).await?;
            out.push(ClipRef {
                transaction_id: *transaction_id,
                file_id: uploaded.id,
                link: uploaded.link,
                start_sec: *start,
                end_sec: *end,
            });
        }
        Ok(out)
    }
}

/// Pure windowed silence scan, factored out of `detect_transactions` so it
/// can be unit-tested without decoding a WAV file.
fn detect_spans(samples: &[f64], sample_rate: f64, window_sec: u32, epsilon: f64) -> Vec<(f64, f64)> {
    let window_len = ((window_sec as f64) * sample_rate).max(1.0) as usize;
    if samples.is_empty() || window_len == 0 {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut active_start: Option<usize> = None;
    let mut window_start = 0usize;

    while window_start < samples.len() {
        let window_end = (window_start + window_len).min(samples.len());
        let window = &samples[window_start..window_end];
        let mean_abs = window.iter().map(|s| s.abs()).sum::<f64>() / window.len() as f64;
        let silent = mean_abs <= epsilon;

        if !silent && active_start.is_none() {
            active_start = Some(window_start);
        } else if silent {
            if let Some(start) = active_start.take() {
                spans.push((start, window_start));
            }
        }

        window_start = window_end;
    }

    if let Some(start) = active_start {
        spans.push((start, samples.len()));
    }

    spans
        .into_iter()
        .map(|(s, e)| (s as f64 / sample_rate, e as f64 / sample_rate))
        .collect()
}

/// Re-encode `[offset_sec, offset_sec + duration_sec)` of `source` into a
/// mono 16 kHz WAV at `dest`, via a streaming `ffmpeg` subprocess so memory
/// use is constant regardless of source length.
async fn reencode_segment(source: &Path, dest: &Path, offset_sec: f64, duration_sec: f64) -> Result<()> {
    let status = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-ss")
        .arg(format!("{offset_sec}"))
        .arg("-i")
        .arg(source)
        .arg("-t")
        .arg(format!("{duration_sec}"))
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg("16000")
        .arg(dest)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map_err(|e| HoptixError::PermanentExternal(format!("failed to spawn ffmpeg: {e}")))?;

    if !status.success() {
        warn!(?status, "ffmpeg re-encode failed");
        return Err(HoptixError::Splitter(format!(
            "ffmpeg exited with status {status}"
        )));
    }
    debug!(dest = %dest.display(), "re-encoded segment");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::LocalFileShare;

    fn splitter() -> MediaSplitter {
        MediaSplitter::new(
            SplitterSettings::default(),
            Arc::new(LocalFileShare::new(std::env::temp_dir())),
        )
    }

    #[test]
    fn plan_single_chunk_for_short_recording() {
        let plan = splitter().plan(60.0, 1024);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].start_sec, 0.0);
        assert_eq!(plan.chunks[0].end_sec, 60.0);
    }

    #[test]
    fn plan_splits_long_recording_with_overlap() {
        let plan = splitter().plan(2500.0, 1024);
        assert!(plan.chunks.len() >= 2);
        for window in plan.chunks.windows(2) {
            assert!(window[1].start_sec < window[0].end_sec);
        }
        assert_eq!(plan.chunks.last().unwrap().end_sec, 2500.0);
    }

    #[test]
    fn detect_spans_empty_recording_yields_no_spans() {
        let samples = vec![0.0; 16000 * 60];
        let spans = detect_spans(&samples, 16000.0, 7, 0.0);
        assert!(spans.is_empty());
    }

    #[test]
    fn detect_spans_two_transactions_clear_gap() {
        let sample_rate = 16000.0;
        let mut samples = Vec::new();
        samples.extend(std::iter::repeat(1000.0).take((20.0 * sample_rate) as usize));
        samples.extend(std::iter::repeat(0.0).take((15.0 * sample_rate) as usize));
        samples.extend(std::iter::repeat(1000.0).take((25.0 * sample_rate) as usize));

        let spans = detect_spans(&samples, sample_rate, 7, 0.0);
        assert_eq!(spans.len(), 2);
        assert!((spans[0].0 - 0.0).abs() < 1.0);
        assert!((spans[1].0 - 35.0).abs() < 7.0);
    }

    #[test]
    fn detect_spans_closes_open_span_at_end_of_stream() {
        let sample_rate = 16000.0;
        let samples: Vec<f64> = std::iter::repeat(500.0).take((10.0 * sample_rate) as usize).collect();
        let spans = detect_spans(&samples, sample_rate, 7, 0.0);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].1, 10.0);
    }
}
