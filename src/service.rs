//! # Document Service
//!
//! Orchestrates the two-phase voice-to-document flow:
//!
//! 1. **analyze**: transcribe the recording, work out the template's fields
//!    and ask the inference collaborator for their values
//! 2. **generate**: write (possibly user-edited) values back into the template
//!
//! A custom template uploaded during analyze is stored under a fresh artifact
//! id together with any inferred field metadata, so generate can run as a
//! separate, stateless request.
//!
//! CPU-bound work (audio decoding, docx parsing and serialization) runs on the
//! blocking pool.

use crate::artifacts::{ArtifactId, ArtifactStore};
use crate::audio::AudioProcessor;
use crate::document::Document;
use crate::error::{AppError, AppResult};
use crate::inference::{FieldResolver, InferenceError};
use crate::template::{
    clean_field_values, extract_placeholders, fill, flatten_object, full_text, FieldSpecs,
    FieldValues, TemplateKind, CUSTOM_DOWNLOAD_NAME,
};
use crate::transcription::{Transcriber, TranscriptionStats};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything an analyze call needs.
#[derive(Debug, Default)]
pub struct AnalyzeRequest {
    pub audio: Vec<u8>,
    /// Upload file name, used as a container hint.
    pub filename: Option<String>,
    pub template_kind: TemplateKind,
    pub custom_template: Option<Vec<u8>>,
}

/// Result of an analyze call, returned to the client as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeOutcome {
    pub transcript: String,
    pub data: FieldValues,
    pub placeholders: Vec<String>,
    pub custom_template_id: Option<String>,
}

#[derive(Debug)]
pub struct GeneratedDocument {
    pub bytes: Vec<u8>,
    pub download_name: &'static str,
}

pub struct DocumentService {
    transcriber: Arc<dyn Transcriber>,
    resolver: FieldResolver,
    store: Arc<dyn ArtifactStore>,
    template_dir: PathBuf,
    audio: AudioProcessor,
}

impl DocumentService {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        resolver: FieldResolver,
        store: Arc<dyn ArtifactStore>,
        template_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transcriber,
            resolver,
            store,
            template_dir: template_dir.into(),
            audio: AudioProcessor::new(),
        }
    }

    /// Replace the default audio pipeline, e.g. to enable the ffmpeg fallback.
    pub fn with_audio(mut self, audio: AudioProcessor) -> Self {
        self.audio = audio;
        self
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    pub fn inference_available(&self) -> bool {
        self.resolver.is_available()
    }

    pub fn transcriber_loaded(&self) -> bool {
        self.transcriber.is_loaded()
    }

    pub fn transcriber_name(&self) -> String {
        self.transcriber.describe()
    }

    pub async fn transcription_stats(&self) -> TranscriptionStats {
        self.transcriber.stats().await
    }

    /// Whether each built-in template file is present.
    pub fn builtin_templates(&self) -> Vec<(TemplateKind, bool)> {
        [TemplateKind::Doctor, TemplateKind::Hr]
            .into_iter()
            .map(|kind| (kind, kind.path_in(&self.template_dir).is_file()))
            .collect()
    }

    /// Remove uploaded templates and metadata older than `ttl`.
    pub async fn sweep_artifacts(&self, ttl: Duration) -> AppResult<usize> {
        Ok(self.store.purge_older_than(ttl).await?)
    }

    /// Transcribe audio and resolve the selected template's fields.
    ///
    /// A custom template is stored before the slow steps run; if any later
    /// step fails it is removed again.
    pub async fn analyze(&self, request: AnalyzeRequest) -> AppResult<AnalyzeOutcome> {
        let AnalyzeRequest {
            audio,
            filename,
            template_kind,
            custom_template,
        } = request;

        let (document, custom_id) = match custom_template {
            Some(bytes) => {
                let (document, bytes) = blocking(move || {
                    let document = Document::from_bytes(&bytes)?;
                    Ok((document, bytes))
                })
                .await?;
                let id = ArtifactId::generate();
                self.store.put_template(id, &bytes).await?;
                info!(template_id = %id, size = bytes.len(), "Stored custom template");
                (document, Some(id))
            }
            None => (self.load_builtin(template_kind).await?, None),
        };

        let result = self.run_analysis(document, audio, filename, custom_id).await;

        if result.is_err() {
            if let Some(id) = custom_id {
                match self.store.remove(id).await {
                    Ok(()) => debug!(template_id = %id, "Removed custom template after failure"),
                    Err(e) => warn!(template_id = %id, "Failed to remove custom template: {}", e),
                }
            }
        }

        result
    }

    async fn run_analysis(
        &self,
        document: Document,
        audio: Vec<u8>,
        filename: Option<String>,
        custom_id: Option<ArtifactId>,
    ) -> AppResult<AnalyzeOutcome> {
        let transcript = self.transcribe(audio, filename).await?;

        let placeholders = extract_placeholders(&document);
        let template_text = full_text(&document);

        if !self.resolver.is_available() {
            return Err(InferenceError::MissingCredential.into());
        }

        let (data, placeholders) = if !placeholders.is_empty() {
            info!(fields = placeholders.len(), "Template has explicit placeholders");
            let data = self
                .resolver
                .resolve_fields(&transcript, &placeholders, &template_text)
                .await?;
            (data, placeholders)
        } else {
            info!("No placeholders found, inferring fields from template text");
            let specs = self.resolver.infer_fields(&transcript, &template_text).await?;
            if let Some(id) = custom_id {
                self.store.put_field_specs(id, &specs).await?;
            }
            (specs.values(), specs.names())
        };

        Ok(AnalyzeOutcome {
            transcript,
            data: clean_field_values(data),
            placeholders,
            custom_template_id: custom_id.map(|id| id.to_string()),
        })
    }

    async fn transcribe(&self, audio: Vec<u8>, filename: Option<String>) -> AppResult<String> {
        let processor = self.audio.clone();
        let samples = blocking(move || Ok(processor.prepare(audio, filename.as_deref())?)).await?;

        let transcript = self
            .transcriber
            .transcribe(&samples)
            .await
            .map_err(|e| AppError::TranscriptionFailed(format!("{:#}", e)))?;

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(AppError::TranscriptionFailed("No speech was recognized".to_string()));
        }
        debug!(chars = transcript.len(), "Transcript ready");
        Ok(transcript)
    }

    /// Fill the selected template with `data`.
    ///
    /// With a custom template id, the stored template is used along with any
    /// field metadata recorded during analyze.
    pub async fn generate(
        &self,
        data: Map<String, Value>,
        template_kind: TemplateKind,
        custom_template_id: Option<&str>,
    ) -> AppResult<GeneratedDocument> {
        let values = flatten_object(&Value::Object(data));

        let (document, specs, download_name) = match custom_template_id {
            Some(raw) => {
                let id = ArtifactId::parse(raw)?;
                let bytes = self.store.template(id).await?.ok_or_else(|| {
                    AppError::TemplateMissing(format!("Custom template {} not found", id))
                })?;
                let specs = self.store.field_specs(id).await?;
                let document = blocking(move || Ok(Document::from_bytes(&bytes)?)).await?;
                (document, specs, CUSTOM_DOWNLOAD_NAME)
            }
            None => (
                self.load_builtin(template_kind).await?,
                None,
                template_kind.download_name(),
            ),
        };

        let bytes = blocking(move || render(document, &values, specs.as_ref())).await?;
        Ok(GeneratedDocument { bytes, download_name })
    }

    async fn load_builtin(&self, kind: TemplateKind) -> AppResult<Document> {
        let path = kind.path_in(&self.template_dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::TemplateMissing(format!(
                    "Template file not found: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "Failed to read template {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        blocking(move || {
            Document::from_bytes(&bytes).map_err(|e| {
                AppError::Internal(format!("Built-in {} template is unreadable: {}", kind, e))
            })
        })
        .await
    }
}

fn render(mut document: Document, values: &FieldValues, specs: Option<&FieldSpecs>) -> AppResult<Vec<u8>> {
    let report = fill(&mut document, values, specs);
    if report.is_empty() {
        warn!(fields = values.len(), "No template text matched the supplied values");
    } else {
        info!(
            literal = report.literal_replacements,
            bracket = report.bracket_replacements,
            rebuilt = report.paragraphs_rebuilt,
            "Filled template"
        );
    }
    Ok(document.to_bytes()?)
}

async fn blocking<T, F>(task: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Internal(format!("Background task failed: {}", e)))?
}
