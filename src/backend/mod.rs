//! Backend abstraction for speaker-recognition engines.
//!
//! The HTTP layer depends on the [`SpeakerModel`] trait instead of a concrete
//! implementation, which keeps request handling decoupled from inference
//! code. Embedding extraction and similarity scoring are consumed as opaque
//! capabilities of the underlying model library.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, BackendKind};
use crate::error::AppError;

pub mod sherpa;

/// Time-bounded span of input audio scored independently against a reference
/// embedding. Bounds are seconds from the start of the clip.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    /// Validates segment bounds: finite, non-negative start, end after start.
    pub fn validate(&self, index: usize) -> Result<(), AppError> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(AppError::invalid_request(format!(
                "segment {index} has non-finite bounds"
            )));
        }
        if self.start < 0.0 {
            return Err(AppError::invalid_request(format!(
                "segment {index} starts before 0"
            )));
        }
        if self.end <= self.start {
            return Err(AppError::invalid_request(format!(
                "segment {index} must end after it starts"
            )));
        }
        Ok(())
    }
}

/// Backend contract implemented by speaker-recognition engines.
#[async_trait]
pub trait SpeakerModel: Send + Sync {
    /// Extracts a speaker embedding from a staged audio file.
    async fn extract_embedding(&self, audio_path: PathBuf) -> Result<Vec<f32>, AppError>;

    /// Scores each segment of a staged audio file against `reference`,
    /// returning one similarity score per segment in submission order.
    async fn similarity_by_segments(
        &self,
        audio_path: PathBuf,
        segments: Vec<Segment>,
        reference: Vec<f32>,
    ) -> Result<Vec<f32>, AppError>;
}

/// Builds the configured backend implementation.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn SpeakerModel>, AppError> {
    match cfg.backend_kind {
        BackendKind::SherpaOnnx => Ok(Arc::new(sherpa::SherpaOnnxBackend::new(cfg)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::Segment;

    #[test]
    fn segment_validation_accepts_ordered_bounds() {
        assert!(Segment {
            start: 0.0,
            end: 1.5
        }
        .validate(0)
        .is_ok());
    }

    #[test]
    fn segment_validation_rejects_bad_bounds() {
        assert!(Segment {
            start: -0.5,
            end: 1.0
        }
        .validate(0)
        .is_err());
        assert!(Segment {
            start: 2.0,
            end: 2.0
        }
        .validate(1)
        .is_err());
        assert!(Segment {
            start: 0.0,
            end: f64::NAN
        }
        .validate(2)
        .is_err());
    }
}
