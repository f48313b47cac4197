//! # Transcription Engine
//!
//! Owns the process-wide Whisper model and turns prepared audio into text.
//!
//! ## Lifecycle:
//! - The model is loaded on first use. The check-and-load runs under a
//!   `tokio::sync::Mutex`, so concurrent first requests load it once.
//! - It is never reloaded per call and lives until the process exits. A
//!   decode that panics drops the model and the next call loads it again.
//! - Decoding runs on the blocking pool while the mutex is held, which keeps
//!   the actix workers free and serializes access to the decoder cache.

use crate::audio::TARGET_SAMPLE_RATE;
use crate::device::{device_label, DevicePreference};
use crate::transcription::model::{ModelSize, WhisperModel};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Speech-to-text over 16 kHz mono samples.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[f32]) -> Result<String>;

    /// Whether the underlying model is in memory.
    fn is_loaded(&self) -> bool {
        true
    }

    /// Human-readable model description for health output.
    fn describe(&self) -> String;

    async fn stats(&self) -> TranscriptionStats {
        TranscriptionStats::default()
    }
}

/// Configuration for transcription processing.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub model_size: ModelSize,
    pub device: DevicePreference,
    /// ISO 639-1 code like "en"; `None` lets the model pick.
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model_size: ModelSize::Base,
            device: DevicePreference::Auto,
            language: Some("en".to_string()),
        }
    }
}

/// Running totals for the metrics endpoint.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct TranscriptionStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_audio_seconds: f64,
    pub total_processing_ms: u64,
}

impl TranscriptionStats {
    /// Ratio of audio time to processing time (>1.0 = faster than real time).
    pub fn throughput_factor(&self) -> f64 {
        if self.total_processing_ms == 0 {
            return 0.0;
        }
        self.total_audio_seconds * 1000.0 / self.total_processing_ms as f64
    }
}

/// Whisper behind a lazily initialized, mutex-guarded slot.
pub struct WhisperTranscriber {
    model: Mutex<Option<WhisperModel>>,
    loaded: AtomicBool,
    config: TranscriptionConfig,
    stats: RwLock<TranscriptionStats>,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            model: Mutex::new(None),
            loaded: AtomicBool::new(false),
            config,
            stats: RwLock::new(TranscriptionStats::default()),
        }
    }

    /// Lock the slot, loading the model first if it is empty.
    async fn loaded_model(&self) -> Result<MutexGuard<'_, Option<WhisperModel>>> {
        let mut guard = self.model.lock().await;
        if guard.is_none() {
            let device = self.config.device.resolve();
            tracing::info!(
                "Loading Whisper {} on {}",
                self.config.model_size,
                device_label(&device)
            );
            let model = WhisperModel::load(self.config.model_size, device, self.config.language.as_deref()).await?;
            *guard = Some(model);
            self.loaded.store(true, Ordering::Release);
        }
        Ok(guard)
    }

    async fn record(&self, audio_seconds: f64, started: Instant, ok: bool) {
        let mut stats = self.stats.write().await;
        stats.total_requests += 1;
        stats.total_audio_seconds += audio_seconds;
        stats.total_processing_ms += started.elapsed().as_millis() as u64;
        if !ok {
            stats.failed_requests += 1;
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[f32]) -> Result<String> {
        if audio.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }
        let started = Instant::now();
        let audio_seconds = audio.len() as f64 / TARGET_SAMPLE_RATE as f64;

        let mut guard = self.loaded_model().await?;
        let mut model = guard.take().ok_or_else(|| anyhow!("No model loaded for transcription"))?;
        let pcm = audio.to_vec();

        let joined = tokio::task::spawn_blocking(move || {
            let result = model.transcribe(&pcm);
            (model, result)
        })
        .await;

        let result = match joined {
            Ok((model, result)) => {
                *guard = Some(model);
                result
            }
            Err(e) => {
                self.loaded.store(false, Ordering::Release);
                Err(anyhow!("Transcription task failed: {}", e))
            }
        };
        drop(guard);

        self.record(audio_seconds, started, result.is_ok()).await;
        match &result {
            Ok(text) => tracing::info!(
                "Transcription completed: {:.2}s audio -> {} chars in {}ms",
                audio_seconds,
                text.len(),
                started.elapsed().as_millis()
            ),
            Err(e) => tracing::error!("Transcription failed: {}", e),
        }
        result
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("whisper-{}", self.config.model_size)
    }

    async fn stats(&self) -> TranscriptionStats {
        self.stats.read().await.clone()
    }
}
