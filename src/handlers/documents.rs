//! # Document Handlers
//!
//! - `POST /transcribe`: multipart upload (`file`, `template_type`,
//!   `template_file`) → transcript and resolved field values
//! - `POST /generate-docx`: JSON field values → filled `.docx` download

use crate::document::DOCX_MIME;
use crate::error::{AppError, AppResult};
use crate::service::AnalyzeRequest;
use crate::state::AppState;
use crate::template::TemplateKind;
use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// Text fields are tiny; anything larger is not a selector.
const MAX_TEXT_FIELD_BYTES: usize = 1024;

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "API is running. Use /transcribe or /generate-docx"
    }))
}

async fn read_field(field: &mut Field, limit: usize, name: &str) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::ValidationError(format!(
                "Field '{}' exceeds the {} byte upload limit",
                name, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

pub async fn transcribe(state: web::Data<AppState>, mut payload: Multipart) -> AppResult<HttpResponse> {
    let limit = state.config.storage.max_upload_bytes();
    let mut audio = None;
    let mut filename = None;
    let mut template_type = None;
    let mut template_file = None;

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(str::to_string);
                audio = Some(read_field(&mut field, limit, &name).await?);
            }
            "template_type" => {
                let bytes = read_field(&mut field, MAX_TEXT_FIELD_BYTES, &name).await?;
                template_type = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            "template_file" => {
                let bytes = read_field(&mut field, limit, &name).await?;
                // Browsers send an empty part when no file was chosen.
                if !bytes.is_empty() {
                    template_file = Some(bytes);
                }
            }
            other => {
                debug!("Ignoring multipart field '{}'", other);
                while field.try_next().await?.is_some() {}
            }
        }
    }

    let audio = audio.ok_or_else(|| AppError::BadRequest("Missing audio upload field 'file'".to_string()))?;
    let template_kind = TemplateKind::from_selector(template_type.as_deref());

    info!(
        audio_bytes = audio.len(),
        filename = filename.as_deref().unwrap_or("<none>"),
        template = %template_kind,
        custom_template = template_file.is_some(),
        "Analyze request received"
    );

    let _job = state.begin_job();
    let outcome = state
        .service
        .analyze(AnalyzeRequest {
            audio,
            filename,
            template_kind,
            custom_template: template_file,
        })
        .await?;

    Ok(HttpResponse::Ok().json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Absent means no edits: an implicit custom template then takes the
    /// values inferred at analyze time.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub template_type: Option<String>,
    #[serde(default)]
    pub custom_template_id: Option<String>,
}

pub async fn generate_docx(
    state: web::Data<AppState>,
    body: web::Json<GenerateRequest>,
) -> AppResult<HttpResponse> {
    let GenerateRequest {
        data,
        template_type,
        custom_template_id,
    } = body.into_inner();
    let template_kind = TemplateKind::from_selector(template_type.as_deref());
    let custom_template_id = custom_template_id.filter(|id| !id.trim().is_empty());

    let generated = state
        .service
        .generate(data, template_kind, custom_template_id.as_deref())
        .await?;

    info!(
        bytes = generated.bytes.len(),
        download = generated.download_name,
        "Generated document"
    );

    Ok(HttpResponse::Ok()
        .content_type(DOCX_MIME)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(generated.download_name.to_string())],
        })
        .body(generated.bytes))
}

#[cfg(test)]
mod tests {
    use crate::audio::decode::tests::wav_bytes;
    use crate::document::testing::{docx, paragraph};
    use crate::document::{Document, DOCX_MIME};
    use crate::handlers;
    use crate::state::tests::state_with;
    use crate::testing::{FakeTranscriber, ScriptedChat};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use serde_json::{json, Value};

    const BOUNDARY: &str = "voice-doc-test-boundary";

    /// `(name, filename, content)` parts as a multipart/form-data body.
    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(parts: &[(&str, Option<&str>, &[u8])]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/transcribe")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart(parts))
    }

    fn tone() -> Vec<u8> {
        let samples: Vec<i16> = (0..4000).map(|i| ((i % 40) as i16 - 20) * 300).collect();
        wav_bytes(&samples, 16_000, 1)
    }

    fn template_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("doctor_template.docx"),
            docx(&[paragraph("Patient: [Name]"), paragraph("Visit: [Date]")]),
        )
        .unwrap();
        dir
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(handlers::configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_root_message() {
        let dir = template_dir();
        let app = app!(state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![])));

        let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(body["message"], "API is running. Use /transcribe or /generate-docx");
    }

    #[actix_web::test]
    async fn test_transcribe_fills_placeholders() {
        let dir = template_dir();
        let chat = ScriptedChat::new(vec![Ok(r#"{"Name": "Jane Smith", "Date": "2024-03-09"}"#.into())]);
        let app = app!(state_with(dir.path(), FakeTranscriber::new("Jane Smith came in"), chat));

        let audio = tone();
        let request = multipart_request(&[
            ("file", Some("visit.wav"), &audio[..]),
            ("template_type", None, &b"doctor"[..]),
        ])
        .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["transcript"], "Jane Smith came in");
        assert_eq!(body["placeholders"], json!(["Date", "Name"]));
        assert_eq!(body["data"]["Name"], "Jane Smith");
        assert_eq!(body["custom_template_id"], Value::Null);
    }

    #[actix_web::test]
    async fn test_transcribe_requires_audio() {
        let dir = template_dir();
        let app = app!(state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![])));

        let request = multipart_request(&[("template_type", None, &b"hr"[..])]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["error"]["type"], "bad_request");
    }

    #[actix_web::test]
    async fn test_transcribe_without_credential_is_unavailable() {
        let dir = template_dir();
        let app = app!(state_with(dir.path(), FakeTranscriber::new("hello"), ScriptedChat::unavailable()));

        let audio = tone();
        let request = multipart_request(&[("file", Some("a.wav"), &audio[..])]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_generate_returns_docx_attachment() {
        let dir = template_dir();
        let app = app!(state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![])));

        let request = test::TestRequest::post()
            .uri("/api/v1/generate-docx")
            .set_json(json!({"data": {"Name": "Jane Smith", "Date": "2024-03-09"}}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), DOCX_MIME);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"medical_note.docx\""
        );

        let bytes = test::read_body(response).await;
        let document = Document::from_bytes(&bytes).unwrap();
        let texts: Vec<String> = document.paragraphs().iter().map(|p| p.text()).collect();
        assert_eq!(texts, vec!["Patient: Jane Smith", "Visit: 2024-03-09"]);
    }

    #[actix_web::test]
    async fn test_generate_without_data_uses_inferred_values() {
        let dir = template_dir();
        let chat = ScriptedChat::new(vec![Ok(
            r#"{"Patient Name": {"original": "John Doe", "new": "Jane Roe"}}"#.into(),
        )]);
        let app = app!(state_with(dir.path(), FakeTranscriber::new("New patient Jane Roe"), chat));

        let audio = tone();
        let template = docx(&[paragraph("Patient: John Doe")]);
        let request = multipart_request(&[
            ("file", Some("visit.wav"), &audio[..]),
            ("template_file", Some("intake.docx"), &template[..]),
        ])
        .to_request();
        let body: Value = test::call_and_read_body_json(&app, request).await;
        let id = body["custom_template_id"].as_str().unwrap().to_string();

        let request = test::TestRequest::post()
            .uri("/generate-docx")
            .set_json(json!({"custom_template_id": id}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = test::read_body(response).await;
        let document = Document::from_bytes(&bytes).unwrap();
        assert_eq!(document.paragraphs()[0].text(), "Patient: Jane Roe");
    }

    #[actix_web::test]
    async fn test_generate_errors() {
        let dir = template_dir();
        let app = app!(state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::new(vec![])));

        let request = test::TestRequest::post()
            .uri("/generate-docx")
            .set_json(json!({"data": {}, "custom_template_id": "not-a-uuid"}))
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::BAD_REQUEST);

        let request = test::TestRequest::post()
            .uri("/generate-docx")
            .set_json(json!({"data": {}, "template_type": "hr"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["error"]["type"], "template_missing");
    }

    #[actix_web::test]
    async fn test_config_hides_credential() {
        let dir = template_dir();
        let app = app!(state_with(dir.path(), FakeTranscriber::new("x"), ScriptedChat::unavailable()));

        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/v1/config").to_request()).await;
        assert_eq!(body["config"]["server"]["port"], 8000);
        assert_eq!(body["config"]["inference"]["credential_present"], false);
        assert!(body["config"]["inference"].get("api_key").is_none());
    }
}
