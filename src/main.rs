//! # Voice Doc Backend - Main Application Entry Point
//!
//! Turns a spoken recording into a filled Word document: the audio is
//! transcribed with Whisper, the template's fields are resolved by a
//! chat-completion model, and the values are written back into the `.docx`
//! with its formatting intact.
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Shared application state and metrics
//! - **health**: System health monitoring endpoints
//! - **middleware**: Request logging and metrics
//! - **handlers**: HTTP request handlers for API endpoints
//! - **error**: Custom error types and HTTP error responses
//! - **service**: The analyze and generate flows
//! - **document / template**: `.docx` access, field discovery and substitution
//! - **inference / transcription / audio**: the external collaborators
//! - **artifacts**: Uploaded templates and inferred field metadata between calls

mod artifacts;
mod audio;
mod config;
mod device;
mod document;
mod error;
mod handlers;
mod health;
mod inference;
mod middleware;
mod service;
mod state;
mod template;
mod transcription;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use artifacts::FileArtifactStore;
use audio::AudioProcessor;
use config::AppConfig;
use inference::{FieldResolver, GroqClient, API_KEY_VAR};
use regex::Regex;
use service::DocumentService;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperTranscriber;

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Builds the document service** (Whisper, inference client, artifact store)
/// 4. **Configures the HTTP server** with CORS, middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// The Whisper model is not loaded here; the first transcription loads it.
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-doc-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let service = build_service(&config).await?;
    let app_state = AppState::new(config.clone(), service);

    spawn_artifact_sweeper(
        app_state.service.clone(),
        config.storage.artifact_ttl(),
        config.storage.sweep_interval(),
    );

    let origin_pattern = config
        .server
        .cors_origin_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("Invalid CORS origin pattern")?;
    let cors_origins = config.server.cors_origins.clone();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(build_cors(&cors_origins, origin_pattern.clone()))
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first wins
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "voice_doc_backend=trace")
/// - If not set, defaults to "voice_doc_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_doc_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Wire the transcriber, inference client and artifact store together.
async fn build_service(config: &AppConfig) -> Result<DocumentService> {
    let template_dir = config.storage.template_path();
    tokio::fs::create_dir_all(&template_dir)
        .await
        .with_context(|| format!("Cannot create template directory {}", template_dir.display()))?;

    let client = GroqClient::from_env(&config.inference)?;
    let resolver = FieldResolver::new(Arc::new(client));
    if !resolver.is_available() {
        warn!("{} is not set; analyze requests will fail until it is configured", API_KEY_VAR);
    }

    let transcriber = WhisperTranscriber::new(config.transcription_config()?);
    let store = FileArtifactStore::new(&template_dir);
    let audio = AudioProcessor::new().with_transcoder(config.ffmpeg_path());
    let service = DocumentService::new(Arc::new(transcriber), resolver, Arc::new(store), template_dir)
        .with_audio(audio);

    for (kind, present) in service.builtin_templates() {
        if !present {
            warn!(
                "Built-in {} template {} is missing from {}",
                kind,
                kind.file_name(),
                service.template_dir().display()
            );
        }
    }

    Ok(service)
}

/// Exact origins plus an optional pattern for preview deployments.
fn build_cors(origins: &[String], pattern: Option<Regex>) -> Cors {
    let mut cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .expose_headers(vec![header::CONTENT_DISPOSITION])
        .supports_credentials()
        .max_age(3600);

    for origin in origins {
        cors = cors.allowed_origin(origin);
    }

    if let Some(pattern) = pattern {
        cors = cors.allowed_origin_fn(move |origin, _req| {
            origin.to_str().map(|o| pattern.is_match(o)).unwrap_or(false)
        });
    }

    cors
}

/// Periodically drop uploaded templates and metadata nobody came back for.
fn spawn_artifact_sweeper(service: Arc<DocumentService>, ttl: Duration, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match service.sweep_artifacts(ttl).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Swept expired template artifacts"),
                Err(e) => warn!("Artifact sweep failed: {}", e),
            }
        }
    });
}

/// Resolves on SIGINT (Ctrl+C) or, on unix, SIGTERM.
///
/// Graceful shutdown lets in-flight requests finish before the server stops.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
