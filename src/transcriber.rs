//! Transcriber (§4.2): ASR over each active span of a chunk.

use crate::capability::Asr;
use crate::error::{HoptixError, Result};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// One contiguous active-audio span, transcribed.
#[derive(Debug, Clone)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

pub struct Transcriber {
    asr: Arc<dyn Asr>,
}

impl Transcriber {
    pub fn new(asr: Arc<dyn Asr>) -> Self {
        Self { asr }
    }

    /// Transcribe each active span of `chunk_wav_path`, in order.
    ///
    /// Empty-text spans are retained with empty `text` rather than dropped.
    #[instrument(skip(self, spans), fields(chunk = %chunk_wav_path.display(), spans = spans.len()))]
    pub async fn transcribe_chunk(&self, chunk_wav_path: &Path, spans: &[(f64, f64)]) -> Result<Vec<Segment>> {
        let mut reader = hound::WavReader::open(chunk_wav_path)
            .map_err(|e| HoptixError::InputMalformed(format!("unreadable wav: {e}")))?;
        let spec = reader.spec();
        let samples: Vec<i32> = match spec.sample_format {
            hound::SampleFormat::Int => reader.samples::<i32>().collect::<std::result::Result<_, _>>().unwrap_or_default(),
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v * i16::MAX as f32) as i32))
                .collect::<std::result::Result<_, _>>()
                .unwrap_or_default(),
        };

        let mut out = Vec::with_capacity(spans.len());
        for (start_sec, end_sec) in spans {
            let start_idx = (*start_sec * spec.sample_rate as f64) as usize;
            let end_idx = ((*end_sec * spec.sample_rate as f64) as usize).min(samples.len());
            let slice = if start_idx < end_idx { &samples[start_idx..end_idx] } else { &[] };

            let bytes = encode_wav(slice, spec)?;
            let text = if bytes.is_empty() {
                String::new()
            } else {
                self.asr.transcribe(&bytes).await?
            };

            out.push(Segment {
                start_sec: *start_sec,
                end_sec: *end_sec,
                text,
            });
        }
        Ok(out)
    }
}

fn encode_wav(samples: &[i32], spec: hound::WavSpec) -> Result<Vec<u8>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(
            &mut buf,
            hound::WavSpec {
                sample_format: hound::SampleFormat::Int,
                ..spec
            },
        )
        .map_err(|e| HoptixError::Transcription(format!("failed to encode span: {e}")))?;
        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|e| HoptixError::Transcription(format!("failed to write sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| HoptixError::Transcription(format!("failed to finalize wav: {e}")))?;
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::FakeAsr;

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
    async fn transcribes_each_span_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("chunk.wav");
        write_test_wav(&wav_path, 10.0, 16000);

        let transcriber = Transcriber::new(Arc::new(FakeAsr {
            fixed_text: "order text".to_string(),
        }));

        let segments = transcriber
            .transcribe_chunk(&wav_path, &[(0.0, 4.0), (5.0, 9.0)])
            .await
            .unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "order text");
        assert_eq!(segments[1].start_sec, 5.0);
    }

    #[test]
    fn encode_wav_empty_slice_is_empty_bytes() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = encode_wav(&[], spec).unwrap();
        assert!(bytes.is_empty());
    }
}
