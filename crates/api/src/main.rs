use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use babblefish_api::{build_router, state::AppState};
use babblefish_config::Settings;
use babblefish_pipeline::{AsrEngine, LanguageRegistry, Pipeline, TranslationEngine};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use babblefish_api::room::manager::RoomManager;

/// Application-specific environment variable for log filtering.
const LOG_ENV_VAR: &str = "BABBLEFISH_LOG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive("info".parse()?)
        .from_env()?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path =
        std::env::var("BABBLEFISH_CONFIG").unwrap_or_else(|_| "babblefish.toml".to_string());
    let settings = Arc::new(Settings::load(Some(Path::new(&config_path)))?);

    info!(
        device = %settings.pipeline.device,
        compute_type = %settings.pipeline.compute_type,
        "starting Babblefish server"
    );

    let registry = Arc::new(LanguageRegistry::new());
    let asr = build_asr(&settings)?;
    let translator = build_translator(&settings);

    let deadline = (settings.pipeline.utterance_deadline_ms > 0)
        .then(|| Duration::from_millis(settings.pipeline.utterance_deadline_ms));
    let pipeline = Arc::new(Pipeline::new(
        asr,
        translator,
        registry.clone(),
        settings.pipeline.permits,
        deadline,
    ));

    let rooms = Arc::new(RoomManager::new(settings.clone(), pipeline.clone()));
    let state = AppState {
        settings: settings.clone(),
        registry,
        pipeline,
        rooms,
    };

    let app = build_router(state);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Babblefish server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Babblefish server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(feature = "local-whisper")]
fn build_asr(settings: &Settings) -> anyhow::Result<Arc<dyn AsrEngine>> {
    use babblefish_pipeline::asr::local_whisper::WhisperEngine;

    let model_path = settings
        .models
        .whisper_model_path
        .as_deref()
        .context("models.whisper_model_path is required with the local-whisper feature")?;
    let engine = WhisperEngine::new(
        model_path,
        settings.models.whisper_beam_size,
        settings.models.language_hint.clone(),
        &settings.pipeline.device,
    )?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "local-whisper"))]
fn build_asr(_settings: &Settings) -> anyhow::Result<Arc<dyn AsrEngine>> {
    anyhow::bail!("no ASR engine compiled in; rebuild with --features local-whisper")
}

#[cfg(feature = "remote-translate")]
fn build_translator(settings: &Settings) -> Option<Arc<dyn TranslationEngine>> {
    use babblefish_pipeline::translate::http::HttpTranslator;

    match settings.models.translate_endpoint.as_deref() {
        Some(endpoint) => Some(Arc::new(HttpTranslator::new(
            endpoint,
            settings.pipeline.device.as_str(),
            settings.pipeline.compute_type.as_str(),
        ))),
        None => {
            tracing::warn!(
                "models.translate_endpoint not set; multi-language utterances will fail"
            );
            None
        }
    }
}

#[cfg(not(feature = "remote-translate"))]
fn build_translator(_settings: &Settings) -> Option<Arc<dyn TranslationEngine>> {
    tracing::warn!("no translation engine compiled in; multi-language utterances will fail");
    None
}
