//! HTTP API surface for voiceprint registration and similarity scoring.
//!
//! This module owns request parsing, authentication, and input validation
//! while delegating storage fetches to [`ObjectStorage`] and inference to a
//! [`SpeakerModel`] backend implementation.

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::audio::validate_extension;
use crate::backend::{Segment, SpeakerModel};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::staging::StagedAudio;
use crate::storage::ObjectStorage;
use crate::store::VoiceprintStore;

/// Human-readable service name returned by health endpoints.
pub const APP_NAME: &str = "voiceprint-server";
/// Service version string returned by health endpoints.
pub const APP_VERSION: &str = "0.1.0";

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    /// Active speaker-model backend implementation.
    pub backend: Arc<dyn SpeakerModel>,
    /// Object-storage client used to fetch registration audio.
    pub storage: Arc<dyn ObjectStorage>,
    /// Persistent voiceprint store.
    pub store: Arc<VoiceprintStore>,
}

impl AppState {
    /// Constructs shared handler state.
    pub fn new(
        cfg: AppConfig,
        backend: Arc<dyn SpeakerModel>,
        storage: Arc<dyn ObjectStorage>,
        store: Arc<VoiceprintStore>,
    ) -> Self {
        Self {
            cfg,
            backend,
            storage,
            store,
        }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/register_voiceprint", post(register_voiceprint))
        .route("/calculate_similarities", post(calculate_similarities))
        .with_state(state)
}

/// Root status endpoint (`GET /`).
pub async fn root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_auth(&state.cfg, &headers)?;
    Ok(Json(json!({
        "status": "ok",
        "name": APP_NAME,
        "version": APP_VERSION,
        "model": state.cfg.speaker_model,
        "registered_users": state.store.user_count(),
    })))
}

/// Alias status endpoint (`GET /health`).
pub async fn health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    root(State(state), headers).await
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    user_id: Option<String>,
    audio_osskey: Option<String>,
}

/// Registers a user's voiceprint from object storage (`POST /register_voiceprint`).
///
/// Fetches the referenced object, stages it locally, extracts an embedding,
/// and overwrites any previous registration for the user.
pub async fn register_voiceprint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<RegisterForm>, FormRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_auth(&state.cfg, &headers)?;

    let Form(form) = form
        .map_err(|err| AppError::invalid_request(format!("invalid form body: {err}")))?;
    let user_id = required_field(form.user_id, "user_id")?;
    let audio_osskey = required_field(form.audio_osskey, "audio_osskey")?;

    let bytes = state.storage.fetch(&audio_osskey).await?;
    let staged = StagedAudio::write(state.cfg.staging_dir.as_ref(), &bytes).await?;

    let embedding = state
        .backend
        .extract_embedding(staged.path().to_path_buf())
        .await?;

    let store = Arc::clone(&state.store);
    let dimensions = embedding.len();
    let store_user = user_id.clone();
    tokio::task::spawn_blocking(move || store.insert(&store_user, embedding))
        .await
        .map_err(|err| AppError::internal(format!("voiceprint persist task failed: {err}")))??;

    info!(
        user_id = %user_id,
        object_key = %audio_osskey,
        dimensions,
        "registered voiceprint"
    );

    Ok(Json(json!({"success": true})))
}

/// Scores uploaded audio segments against a stored voiceprint
/// (`POST /calculate_similarities`).
pub async fn calculate_similarities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    require_auth(&state.cfg, &headers)?;

    let form = parse_similarity_form(&mut multipart).await?;

    let reference = state
        .store
        .get(&form.user_id)
        .ok_or(AppError::NotRegistered)?;

    let staged = StagedAudio::write(state.cfg.staging_dir.as_ref(), &form.bytes).await?;
    let similarities = state
        .backend
        .similarity_by_segments(staged.path().to_path_buf(), form.segments.clone(), reference)
        .await?;

    info!(
        user_id = %form.user_id,
        segment_count = form.segments.len(),
        "scored similarity"
    );

    Ok(Json(json!({"similarities": similarities})))
}

struct SimilarityForm {
    bytes: Vec<u8>,
    user_id: String,
    segments: Vec<Segment>,
}

/// Accepted shapes of the `segments` multipart field.
#[derive(Deserialize)]
#[serde(untagged)]
enum SegmentsPayload {
    Wrapped { segments: Vec<Segment> },
    Bare(Vec<Segment>),
}

/// Parses and validates multipart form fields for similarity scoring.
async fn parse_similarity_form(multipart: &mut Multipart) -> Result<SimilarityForm, AppError> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut user_id: Option<String> = None;
    let mut segments_raw: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };

        match name.as_str() {
            "audio" => {
                let filename = field
                    .file_name()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| AppError::bad_multipart("audio field is missing filename"))?;
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_multipart(format!("failed to read audio bytes: {err}"))
                })?;
                file_name = Some(filename);
                file_bytes = Some(bytes.to_vec());
            }
            "user_id" => {
                user_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| {
                            AppError::bad_multipart(format!("invalid user_id field: {err}"))
                        })?
                        .trim()
                        .to_string(),
                )
                .filter(|v| !v.is_empty());
            }
            "segments" => {
                segments_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| {
                            AppError::bad_multipart(format!("invalid segments field: {err}"))
                        })?
                        .trim()
                        .to_string(),
                )
                .filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let filename = file_name
        .ok_or_else(|| AppError::invalid_request("missing required multipart field: audio"))?;
    validate_extension(&filename)?;
    let bytes =
        file_bytes.ok_or_else(|| AppError::invalid_request("missing audio file content"))?;
    if bytes.is_empty() {
        return Err(AppError::invalid_request("uploaded audio file is empty"));
    }

    let user_id = user_id
        .ok_or_else(|| AppError::invalid_request("missing required multipart field: user_id"))?;
    let segments_raw = segments_raw
        .ok_or_else(|| AppError::invalid_request("missing required multipart field: segments"))?;
    let segments = parse_segments(&segments_raw)?;

    Ok(SimilarityForm {
        bytes,
        user_id,
        segments,
    })
}

/// Parses the `segments` field: `{"segments": [{"start":s,"end":e},...]}` or
/// a bare array of the same objects.
fn parse_segments(raw: &str) -> Result<Vec<Segment>, AppError> {
    let payload = serde_json::from_str::<SegmentsPayload>(raw).map_err(|err| {
        AppError::invalid_request(format!(
            "invalid segments field: expected JSON start/end pairs: {err}"
        ))
    })?;
    let segments = match payload {
        SegmentsPayload::Wrapped { segments } => segments,
        SegmentsPayload::Bare(segments) => segments,
    };

    for (index, segment) in segments.iter().enumerate() {
        segment.validate(index)?;
    }

    Ok(segments)
}

fn required_field(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::invalid_request(format!("missing required field: {name}")))
}

/// Enforces optional bearer-token authentication.
fn require_auth(cfg: &AppConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected_api_key) = cfg.api_key.as_deref() else {
        return Ok(());
    };

    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Err(AppError::unauthorized("missing bearer token"));
    };

    let value = raw
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid authorization header"))?;

    let mut parts = value.split_whitespace();
    let scheme = parts
        .next()
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
    let token = parts
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized("missing bearer token"));
    }

    if token != expected_api_key {
        return Err(AppError::unauthorized("invalid token"));
    }

    Ok(())
}
