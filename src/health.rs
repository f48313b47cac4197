//! Liveness and metrics endpoints.
//!
//! A missing built-in template or inference credential reports `degraded`
//! with a 200, so the operator can see what is absent.

use crate::inference::API_KEY_VAR;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let service = &state.service;

    let inference_ready = service.inference_available();
    let templates_ready = service.builtin_templates().iter().all(|(_, present)| *present);
    let status = if inference_ready && templates_ready { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": request_summary(&metrics),
        "memory": process_memory(),
        "models": {
            "whisper": {
                "model": service.transcriber_name(),
                "status": if service.transcriber_loaded() { "loaded" } else { "not_loaded" },
                "loads_on_first_request": true
            },
            "inference": {
                "model": config.inference.model,
                "credential_present": inference_ready,
                "credential_variable": API_KEY_VAR
            }
        },
        "templates": template_status(&state)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let transcription = state.service.transcription_stats().await;

    let mut endpoints: Vec<Value> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoints.sort_by(|a, b| b["request_count"].as_u64().cmp(&a["request_count"].as_u64()));

    let mut overall = request_summary(&metrics);
    overall["requests_per_second"] = json!(if uptime_seconds > 0 {
        metrics.request_count as f64 / uptime_seconds as f64
    } else {
        0.0
    });

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": overall,
        "endpoints": endpoints,
        "transcription": {
            "model": state.service.transcriber_name(),
            "loaded": state.service.transcriber_loaded(),
            "total_requests": transcription.total_requests,
            "failed_requests": transcription.failed_requests,
            "total_audio_seconds": transcription.total_audio_seconds,
            "throughput_factor": transcription.throughput_factor()
        },
        "memory": process_memory()
    }))
}

fn request_summary(metrics: &AppMetrics) -> Value {
    json!({
        "total_requests": metrics.request_count,
        "total_errors": metrics.error_count,
        "error_rate": metrics.error_rate(),
        "active_jobs": metrics.active_jobs
    })
}

fn template_status(state: &AppState) -> Value {
    let dir = state.service.template_dir();
    let builtin: Vec<Value> = state
        .service
        .builtin_templates()
        .into_iter()
        .map(|(kind, present)| {
            json!({
                "template_type": kind,
                "file": kind.file_name(),
                "present": present
            })
        })
        .collect();

    json!({
        "directory": dir.display().to_string(),
        "directory_exists": dir.is_dir(),
        "builtin": builtin
    })
}

/// `VmRSS`/`VmSize` from a `/proc/<pid>/status` dump, in bytes.
fn parse_proc_status(status: &str) -> (u64, u64) {
    let kib = |key: &str| {
        status
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse::<u64>().ok())
            .map_or(0, |n| n * 1024)
    };
    (kib("VmRSS:"), kib("VmSize:"))
}

fn process_memory() -> Value {
    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => {
            let (resident, virtual_size) = parse_proc_status(&status);
            json!({
                "resident_memory_bytes": resident,
                "virtual_memory_bytes": virtual_size,
                "available": true
            })
        }
        Err(_) => json!({
            "resident_memory_bytes": 0,
            "virtual_memory_bytes": 0,
            "available": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::testing::{docx, paragraph};
    use crate::state::tests::state_with;
    use crate::testing::{FakeTranscriber, ScriptedChat};
    use actix_web::{test, App};

    #[::core::prelude::v1::test]
    fn test_parse_proc_status() {
        let status = "Name:\tvoice-doc\nVmSize:\t  204800 kB\nVmRSS:\t   51200 kB\nThreads:\t8\n";
        assert_eq!(parse_proc_status(status), (51200 * 1024, 204800 * 1024));
        assert_eq!(parse_proc_status("Name:\tx\n"), (0, 0));
    }

    #[actix_web::test]
    async fn test_health_reports_missing_templates_as_degraded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doctor_template.docx"), docx(&[paragraph("x")])).unwrap();
        let state = state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![]));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(body["status"], "degraded");
        assert_eq!(body["models"]["inference"]["credential_present"], true);
        assert_eq!(body["models"]["whisper"]["model"], "fake");
        assert_eq!(body["templates"]["builtin"][0]["present"], true);
        assert_eq!(body["templates"]["builtin"][1]["template_type"], "hr");
        assert_eq!(body["templates"]["builtin"][1]["present"], false);
    }

    #[actix_web::test]
    async fn test_metrics_include_transcription_section() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::unavailable());

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/metrics").to_request()).await;

        assert_eq!(body["overall"]["active_jobs"], 0);
        assert_eq!(body["transcription"]["total_requests"], 0);
        assert!(body["endpoints"].as_array().unwrap().is_empty());
    }
}
