use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective runtime configuration. Read-only; the inference key is reported
/// only as present or absent.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": config.server,
            "models": config.models,
            "inference": {
                "api_url": config.inference.api_url,
                "model": config.inference.model,
                "temperature": config.inference.temperature,
                "timeout_secs": config.inference.timeout_secs,
                "max_attempts": config.inference.max_attempts,
                "backoff_base_ms": config.inference.backoff_base_ms,
                "credential_present": state.service.inference_available()
            },
            "storage": config.storage
        }
    })))
}
