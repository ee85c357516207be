mod api;
mod audio;
mod backend;
mod config;
mod error;
mod model_store;
mod staging;
mod storage;
mod store;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::api::{build_router, AppState};
use crate::backend::build_backend;
use crate::config::AppConfig;
use crate::model_store::ensure_model_ready;
use crate::staging::ensure_staging_dir;
use crate::storage::OssBucket;
use crate::store::VoiceprintStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voiceprint_server=info,axum=info".into()),
        )
        .compact()
        .init();

    // Model download uses a blocking HTTP client; keep it off the runtime.
    let cfg = {
        let mut cfg = AppConfig::from_env()?;
        tokio::task::spawn_blocking(move || ensure_model_ready(&mut cfg).map(|_| cfg)).await??
    };
    ensure_staging_dir(Path::new(&cfg.staging_dir))?;

    let backend = build_backend(&cfg)?;
    let storage = Arc::new(OssBucket::new(&cfg)?);
    let store = Arc::new(VoiceprintStore::open(&cfg.voiceprint_path)?);

    info!(
        voiceprints = store.user_count(),
        path = %cfg.voiceprint_path,
        "loaded voiceprint store"
    );

    let state = Arc::new(AppState::new(cfg.clone(), backend, storage, store));
    let app = build_router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        model = %cfg.speaker_model,
        bucket = %cfg.oss_bucket,
        "starting voiceprint-server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
