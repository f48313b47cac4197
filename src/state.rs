//! # Application State Management
//!
//! Shared state handed to every request handler through `web::Data`.
//!
//! ## Sharing Pattern:
//! - **config**: fixed after startup, so a plain `Arc<AppConfig>`
//! - **service**: the document pipeline; internally synchronized
//! - **metrics**: updated by every request, so `Arc<RwLock<AppMetrics>>`
//!
//! Metric locks are std `RwLock`s held only for a few arithmetic operations,
//! never across an `.await`. A poisoned lock still holds usable counters, so
//! it is recovered instead of propagated.

use crate::config::AppConfig;
use crate::service::DocumentService;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Cloned into every worker; all fields are shared handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Transcription, inference and template filling.
    pub service: Arc<DocumentService>,

    /// Written by `MetricsMiddleware` and `begin_job`.
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Process-wide request counters, reset on restart.
///
/// `active_jobs` counts analyze calls still transcribing or waiting on
/// inference; a 4xx or 5xx response counts toward `error_count`.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_jobs: u32,
    /// Keyed by `"{method} {route pattern}"`, e.g. `"POST /transcribe"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Decrements the active job counter when dropped, on success and error paths.
pub struct JobGuard {
    state: AppState,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut metrics = self.state.write_metrics();
        metrics.active_jobs = metrics.active_jobs.saturating_sub(1);
    }
}

impl AppState {
    pub fn new(config: AppConfig, service: DocumentService) -> Self {
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record timing for one request to `endpoint` ("METHOD /path").
    ///
    /// The first time we see an endpoint, a zeroed EndpointMetric is created.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count an analyze call as active until the returned guard is dropped.
    pub fn begin_job(&self) -> JobGuard {
        self.write_metrics().active_jobs += 1;
        JobGuard { state: self.clone() }
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate from 0.0 (no errors) to 1.0 (every request failed).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifactStore;
    use crate::inference::FieldResolver;
    use crate::testing::{FakeTranscriber, ScriptedChat};

    /// State over in-process fakes with templates read from `template_dir`.
    pub(crate) fn state_with(
        template_dir: &std::path::Path,
        transcriber: FakeTranscriber,
        chat: ScriptedChat,
    ) -> AppState {
        let service = DocumentService::new(
            Arc::new(transcriber),
            FieldResolver::new(Arc::new(chat)),
            Arc::new(MemoryArtifactStore::new()),
            template_dir,
        );
        let mut config = AppConfig::default();
        config.storage.template_dir = template_dir.display().to_string();
        AppState::new(config, service)
    }

    #[test]
    fn test_endpoint_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![]));

        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_endpoint_request("POST /transcribe", 30, false);
        state.record_endpoint_request("POST /transcribe", 10, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert!((metrics.error_rate() - 0.5).abs() < f64::EPSILON);
        let endpoint = &metrics.endpoint_metrics["POST /transcribe"];
        assert_eq!(endpoint.average_duration_ms(), 20.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }

    #[test]
    fn test_job_guard_decrements_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![]));

        let first = state.begin_job();
        let second = state.begin_job();
        assert_eq!(state.get_metrics_snapshot().active_jobs, 2);
        drop(first);
        drop(second);
        assert_eq!(state.get_metrics_snapshot().active_jobs, 0);
    }
}
