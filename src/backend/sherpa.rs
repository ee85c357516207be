//! sherpa-onnx backend implementation.
//!
//! This backend keeps a pool of embedding extractors in memory and runs
//! inference on blocking worker threads. Embedding extraction and cosine
//! similarity come from `sherpa-rs`; this module only stages samples for it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sherpa_rs::speaker_id::{compute_cosine_similarity, EmbeddingExtractor, ExtractorConfig};
use tokio::task;
use tracing::info;

use crate::audio::{decode_to_mono_16k, MODEL_SAMPLE_RATE};
use crate::backend::{Segment, SpeakerModel};
use crate::config::AppConfig;
use crate::error::AppError;

/// Local inference backend powered by `sherpa-rs`.
pub struct SherpaOnnxBackend {
    model_path: String,
    extractors: Vec<Arc<Mutex<EmbeddingExtractor>>>,
    next_extractor_idx: AtomicUsize,
}

impl SherpaOnnxBackend {
    /// Loads the configured speaker model and prepares reusable extractors.
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let model_path = cfg.speaker_model.clone();
        let extractors = build_extractors(&model_path, cfg.speaker_parallelism)?;

        info!(
            model = %model_path,
            speaker_parallelism = cfg.speaker_parallelism,
            "initialized sherpa-onnx speaker backend"
        );

        Ok(Self {
            model_path,
            extractors,
            next_extractor_idx: AtomicUsize::new(0),
        })
    }

    fn next_extractor(&self) -> Arc<Mutex<EmbeddingExtractor>> {
        let idx = self.next_extractor_idx.fetch_add(1, Ordering::Relaxed) % self.extractors.len();
        Arc::clone(&self.extractors[idx])
    }
}

fn build_extractors(
    model_path: &str,
    parallelism: usize,
) -> Result<Vec<Arc<Mutex<EmbeddingExtractor>>>, AppError> {
    let mut extractors = Vec::with_capacity(parallelism);
    for worker_idx in 0..parallelism {
        let config = ExtractorConfig {
            model: model_path.to_string(),
            ..Default::default()
        };
        let extractor = EmbeddingExtractor::new(config).map_err(|err| {
            AppError::model(format!(
                "failed to load speaker model at {model_path:?} for worker {}: {err}",
                worker_idx + 1
            ))
        })?;
        extractors.push(Arc::new(Mutex::new(extractor)));
    }
    Ok(extractors)
}

#[async_trait]
impl SpeakerModel for SherpaOnnxBackend {
    async fn extract_embedding(&self, audio_path: PathBuf) -> Result<Vec<f32>, AppError> {
        let model_path = self.model_path.clone();
        let extractor = self.next_extractor();
        task::spawn_blocking(move || run_extract(&audio_path, &model_path, extractor))
            .await
            .map_err(|err| AppError::internal(format!("speaker worker task failed: {err}")))?
    }

    async fn similarity_by_segments(
        &self,
        audio_path: PathBuf,
        segments: Vec<Segment>,
        reference: Vec<f32>,
    ) -> Result<Vec<f32>, AppError> {
        let model_path = self.model_path.clone();
        let extractor = self.next_extractor();
        task::spawn_blocking(move || {
            run_similarity(&audio_path, &segments, &reference, &model_path, extractor)
        })
        .await
        .map_err(|err| AppError::internal(format!("speaker worker task failed: {err}")))?
    }
}

fn run_extract(
    audio_path: &Path,
    model_path: &str,
    extractor: Arc<Mutex<EmbeddingExtractor>>,
) -> Result<Vec<f32>, AppError> {
    let samples = decode_to_mono_16k(audio_path)?;
    compute_embedding(&samples, model_path, &extractor)
}

fn run_similarity(
    audio_path: &Path,
    segments: &[Segment],
    reference: &[f32],
    model_path: &str,
    extractor: Arc<Mutex<EmbeddingExtractor>>,
) -> Result<Vec<f32>, AppError> {
    let samples = decode_to_mono_16k(audio_path)?;

    let mut scores = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let span = slice_segment(&samples, *segment, MODEL_SAMPLE_RATE, index)?;
        let embedding = compute_embedding(span, model_path, &extractor)?;
        if embedding.len() != reference.len() {
            return Err(AppError::model(format!(
                "stored voiceprint has dimension {} but the model produces {}; re-register the voiceprint",
                reference.len(),
                embedding.len()
            )));
        }
        scores.push(compute_cosine_similarity(reference, &embedding));
    }

    Ok(scores)
}

fn compute_embedding(
    samples: &[f32],
    model_path: &str,
    extractor: &Arc<Mutex<EmbeddingExtractor>>,
) -> Result<Vec<f32>, AppError> {
    let mut guard = extractor
        .lock()
        .map_err(|_| AppError::model("failed to lock speaker model extractor"))?;
    guard
        .compute_speaker_embedding(samples.to_vec(), MODEL_SAMPLE_RATE)
        .map_err(|err| {
            AppError::model(format!(
                "embedding extraction failed using {model_path:?}: {err}"
            ))
        })
}

/// Cuts one segment's samples out of the decoded clip.
///
/// The end bound is clamped to the clip length; a segment starting at or past
/// the end of the clip is an error naming the offending index.
fn slice_segment(
    samples: &[f32],
    segment: Segment,
    sample_rate: u32,
    index: usize,
) -> Result<&[f32], AppError> {
    let start = (segment.start * sample_rate as f64).floor() as usize;
    let end = ((segment.end * sample_rate as f64).ceil() as usize).min(samples.len());

    if start >= samples.len() || start >= end {
        return Err(AppError::model(format!(
            "segment {index} ({:.2}s..{:.2}s) is beyond the end of the audio",
            segment.start, segment.end
        )));
    }

    Ok(&samples[start..end])
}

#[cfg(test)]
mod tests {
    use super::slice_segment;
    use crate::backend::Segment;

    #[test]
    fn slices_requested_span() {
        let samples = vec![0.0f32; 32_000];
        let span = slice_segment(
            &samples,
            Segment {
                start: 0.5,
                end: 1.0,
            },
            16_000,
            0,
        )
        .expect("slice");
        assert_eq!(span.len(), 8_000);
    }

    #[test]
    fn clamps_end_to_clip_length() {
        let samples = vec![0.0f32; 16_000];
        let span = slice_segment(
            &samples,
            Segment {
                start: 0.5,
                end: 10.0,
            },
            16_000,
            0,
        )
        .expect("slice");
        assert_eq!(span.len(), 8_000);
    }

    #[test]
    fn rejects_segment_past_end_of_clip() {
        let samples = vec![0.0f32; 16_000];
        assert!(slice_segment(
            &samples,
            Segment {
                start: 2.0,
                end: 3.0,
            },
            16_000,
            4,
        )
        .is_err());
    }
}
