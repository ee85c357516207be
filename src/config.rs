//! Configuration loading from environment variables.
//!
//! Values are intentionally validated early so startup fails fast with
//! actionable errors.

use crate::error::AppError;
use std::env;

pub const DEFAULT_SPEAKER_PARALLELISM: usize = 1;
pub const MAX_SPEAKER_PARALLELISM: usize = 8;

/// Default speaker-embedding model fetched when none is configured.
pub const DEFAULT_SPEAKER_MODEL_URL: &str =
    "https://github.com/k2-fsa/sherpa-onnx/releases/download/speaker-recongition-models/nemo_en_speakerverification_speakernet.onnx";

/// Supported speaker-model backend implementations.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BackendKind {
    /// Uses `sherpa-rs` (sherpa-onnx) for local embedding extraction.
    SherpaOnnx,
}

/// Runtime configuration for the HTTP server, storage, and model backend.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Optional bearer token required by all endpoints.
    pub api_key: Option<String>,
    /// Path of the voiceprint JSON document.
    pub voiceprint_path: String,
    /// Directory used to stage uploaded/fetched audio before inference.
    pub staging_dir: String,
    /// Object-storage endpoint host, for example `oss-cn-hangzhou.aliyuncs.com`.
    pub oss_endpoint: String,
    /// Object-storage bucket name.
    pub oss_bucket: String,
    /// Optional bearer token sent on object fetches.
    pub oss_token: Option<String>,
    /// Path to a speaker-embedding ONNX model on disk.
    pub speaker_model: String,
    /// Whether `speaker_model` came from explicit `SPEAKER_MODEL`.
    pub speaker_model_explicit: bool,
    /// Enables startup download when the model file is missing.
    pub speaker_auto_download: bool,
    /// URL the model is downloaded from when missing.
    pub speaker_model_url: String,
    /// Local cache directory for downloaded models.
    pub speaker_cache_dir: String,
    /// Selected backend implementation.
    pub backend_kind: BackendKind,
    /// Number of pooled embedding extractors.
    pub speaker_parallelism: usize,
}

impl AppConfig {
    /// Builds configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `13700`)
    /// - `API_KEY` (optional bearer token)
    /// - `VOICEPRINT_FILE` (default `./data/voiceprint.json`)
    /// - `STAGING_DIR` (default `./tmp`)
    /// - `OSS_ENDPOINT` (required)
    /// - `OSS_BUCKET_NAME` (required)
    /// - `OSS_ACCESS_TOKEN` (optional)
    /// - `SPEAKER_MODEL` (optional explicit local model path)
    /// - `SPEAKER_AUTO_DOWNLOAD` (default `true`)
    /// - `SPEAKER_MODEL_URL` (default speakernet release asset)
    /// - `SPEAKER_CACHE_DIR` (default `$HOME/.cache/voiceprint-server/models`)
    /// - `SPEAKER_BACKEND` (only `sherpa-onnx` is currently supported)
    /// - `SPEAKER_PARALLELISM` (default `1`, min `1`, max `8`)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 13700)?;
        let voiceprint_path = env_str("VOICEPRINT_FILE", "./data/voiceprint.json");
        let staging_dir = env_str("STAGING_DIR", "./tmp");

        let oss_endpoint = env_required("OSS_ENDPOINT")?;
        let oss_bucket = env_required("OSS_BUCKET_NAME")?;

        let speaker_auto_download = env_bool("SPEAKER_AUTO_DOWNLOAD", true)?;
        let speaker_model_url = env_str("SPEAKER_MODEL_URL", DEFAULT_SPEAKER_MODEL_URL);
        let speaker_cache_dir = env_str("SPEAKER_CACHE_DIR", &default_speaker_cache_dir());
        let speaker_model_explicit = env_opt("SPEAKER_MODEL").is_some();
        let speaker_model = env_opt("SPEAKER_MODEL").unwrap_or_else(|| {
            format!(
                "{}/{}",
                speaker_cache_dir,
                model_filename(&speaker_model_url)
            )
        });

        let backend_kind = match env_str("SPEAKER_BACKEND", "sherpa-onnx").as_str() {
            "sherpa-onnx" => BackendKind::SherpaOnnx,
            other => {
                return Err(AppError::internal(format!(
                    "invalid SPEAKER_BACKEND={other:?}; expected sherpa-onnx"
                )));
            }
        };
        let speaker_parallelism = env_usize_bounded(
            "SPEAKER_PARALLELISM",
            DEFAULT_SPEAKER_PARALLELISM,
            1,
            MAX_SPEAKER_PARALLELISM,
        )?;

        Ok(Self {
            host,
            port,
            api_key: env_opt("API_KEY"),
            voiceprint_path,
            staging_dir,
            oss_endpoint,
            oss_bucket,
            oss_token: env_opt("OSS_ACCESS_TOKEN"),
            speaker_model,
            speaker_model_explicit,
            speaker_auto_download,
            speaker_model_url,
            speaker_cache_dir,
            backend_kind,
            speaker_parallelism,
        })
    }
}

/// Returns the file name component of a model URL.
pub fn model_filename(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("speaker-model.onnx")
        .to_string()
}

fn default_speaker_cache_dir() -> String {
    format!(
        "{}/.cache/voiceprint-server/models",
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    )
}

fn env_str(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => default.to_string(),
    }
}

fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_required(name: &str) -> Result<String, AppError> {
    env_opt(name).ok_or_else(|| {
        AppError::internal(format!("missing required environment variable {name}"))
    })
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::internal(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_bool(name: &str, default: bool) -> Result<bool, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected true/false"
        ))),
    }
}

fn env_usize_bounded(
    name: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_usize_bounded(name, &raw, min, max)
}

fn parse_usize_bounded(name: &str, raw: &str, min: usize, max: usize) -> Result<usize, AppError> {
    let trimmed = raw.trim();
    let parsed = trimmed.parse::<usize>().map_err(|_| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::{model_filename, parse_usize_bounded};

    #[test]
    fn parse_usize_bounded_accepts_in_range_values() {
        assert_eq!(
            parse_usize_bounded("SPEAKER_PARALLELISM", "1", 1, 8).unwrap(),
            1
        );
        assert_eq!(
            parse_usize_bounded("SPEAKER_PARALLELISM", "8", 1, 8).unwrap(),
            8
        );
    }

    #[test]
    fn parse_usize_bounded_rejects_non_numeric_value() {
        assert!(parse_usize_bounded("SPEAKER_PARALLELISM", "abc", 1, 8).is_err());
    }

    #[test]
    fn parse_usize_bounded_rejects_out_of_range_values() {
        assert!(parse_usize_bounded("SPEAKER_PARALLELISM", "0", 1, 8).is_err());
        assert!(parse_usize_bounded("SPEAKER_PARALLELISM", "9", 1, 8).is_err());
    }

    #[test]
    fn model_filename_uses_last_url_segment() {
        assert_eq!(
            model_filename("https://example.com/models/campplus.onnx"),
            "campplus.onnx"
        );
        assert_eq!(model_filename("https://example.com/"), "speaker-model.onnx");
    }
}
