pub mod config;
pub mod documents;

pub use config::*;
pub use documents::*;

use crate::error::AppError;
use crate::health;
use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest};

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(format!("Invalid JSON body: {}", err)).into()
}

/// Every route, at the root for the existing frontend and under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(get_config))
                .route("/transcribe", web::post().to(transcribe))
                .route("/generate-docx", web::post().to(generate_docx)),
        )
        .route("/", web::get().to(root))
        .route("/health", web::get().to(health::health_check))
        .route("/transcribe", web::post().to(transcribe))
        .route("/generate-docx", web::post().to(generate_docx));
}
