//! # Field Resolver
//!
//! Turns a transcript into field values with the help of a [`ChatCompletion`]
//! collaborator. Two modes:
//!
//! - **Explicit**: the template names its fields as `[placeholders]`; the
//!   model fills a flat `{name: value}` object.
//! - **Implicit**: the template is an already-filled example; the model finds
//!   each field's current value (`original`) and its replacement (`new`).
//!
//! Malformed JSON in a reply degrades to an empty result
//! and is logged, never returned as an error. Transport and service failures
//! are returned as [`InferenceError`].

use super::client::{ChatCompletion, InferenceError};
use super::prompts;
use crate::template::{flatten_object, normalize_value, FieldSpec, FieldSpecs, FieldValues};
use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decoded model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceResponse {
    Flat(FieldValues),
    Specs(FieldSpecs),
    ParseError(String),
}

fn parse_object(raw: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("reply is JSON but not an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Decode an explicit-mode reply.
pub fn decode_flat(raw: &str) -> InferenceResponse {
    match parse_object(raw) {
        Ok(value) => InferenceResponse::Flat(flatten_object(&value)),
        Err(message) => InferenceResponse::ParseError(message),
    }
}

/// Decode an implicit-mode reply. Entries that are not `{original, new}`
/// objects keep their value as `new` with an empty `original`.
pub fn decode_specs(raw: &str) -> InferenceResponse {
    let value = match parse_object(raw) {
        Ok(value) => value,
        Err(message) => return InferenceResponse::ParseError(message),
    };

    let specs = value
        .as_object()
        .into_iter()
        .flatten()
        .map(|(name, entry)| {
            let member = |key: &str| entry.get(key).map(normalize_value).unwrap_or_default();
            match entry {
                Value::Object(_) => FieldSpec {
                    name: name.trim().to_string(),
                    original: member("original"),
                    new: member("new"),
                },
                other => FieldSpec {
                    name: name.trim().to_string(),
                    original: String::new(),
                    new: normalize_value(other),
                },
            }
        })
        .collect();

    InferenceResponse::Specs(specs)
}

/// Date-like fields the model left empty or "Not mentioned" get `today`.
pub fn apply_date_fallback(specs: &mut FieldSpecs, today: NaiveDate) -> usize {
    let stamp = today.format("%Y-%m-%d").to_string();
    let mut applied = 0;
    for spec in specs.iter_mut() {
        let unanswered = spec.new.trim().is_empty() || spec.new.trim().eq_ignore_ascii_case("not mentioned");
        if unanswered && spec.name.to_lowercase().contains("date") {
            spec.new = stamp.clone();
            applied += 1;
        }
    }
    applied
}

pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct FieldResolver {
    chat: Arc<dyn ChatCompletion>,
    today: Clock,
}

impl FieldResolver {
    pub fn new(chat: Arc<dyn ChatCompletion>) -> Self {
        Self {
            chat,
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    pub fn with_clock(mut self, today: Clock) -> Self {
        self.today = today;
        self
    }

    pub fn is_available(&self) -> bool {
        self.chat.is_available()
    }

    /// Explicit mode: values for the given placeholder names.
    pub async fn resolve_fields(
        &self,
        transcript: &str,
        placeholders: &[String],
        template_text: &str,
    ) -> Result<FieldValues, InferenceError> {
        if placeholders.is_empty() {
            return Ok(FieldValues::new());
        }

        let request = prompts::extraction_request(transcript, template_text, placeholders);
        let raw = self
            .chat
            .complete_json(prompts::EXTRACTION_INSTRUCTIONS, &request)
            .await?;

        match decode_flat(&raw) {
            InferenceResponse::Flat(values) => {
                debug!(fields = values.len(), "Resolved placeholder values");
                Ok(values)
            }
            InferenceResponse::ParseError(message) => {
                warn!("Could not decode field values, continuing with none: {}", message);
                Ok(FieldValues::new())
            }
            InferenceResponse::Specs(_) => Ok(FieldValues::new()),
        }
    }

    /// Implicit mode: each field's current literal and its replacement.
    pub async fn infer_fields(&self, transcript: &str, template_text: &str) -> Result<FieldSpecs, InferenceError> {
        let request = prompts::inference_request(transcript, template_text);
        let raw = self
            .chat
            .complete_json(prompts::INFERENCE_INSTRUCTIONS, &request)
            .await?;

        let mut specs = match decode_specs(&raw) {
            InferenceResponse::Specs(specs) => specs,
            InferenceResponse::ParseError(message) => {
                warn!("Could not decode inferred fields, continuing with none: {}", message);
                return Ok(FieldSpecs::new());
            }
            InferenceResponse::Flat(_) => return Ok(FieldSpecs::new()),
        };

        let dated = apply_date_fallback(&mut specs, (self.today)());
        info!(fields = specs.len(), dated, "Inferred template fields");
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChat;

    fn fixed_day() -> Clock {
        Arc::new(|| NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
    }

    fn spec(name: &str, original: &str, new: &str) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            original: original.into(),
            new: new.into(),
        }
    }

    #[test]
    fn test_decode_flat_normalizes_values() {
        let decoded = decode_flat(r#"{"Symptoms": ["cough", "fever"], "Extra": {"a": 1}, "Note": null}"#);
        let InferenceResponse::Flat(values) = decoded else {
            panic!("expected flat values");
        };
        assert_eq!(values["Symptoms"], "cough, fever");
        assert_eq!(values["Extra"], "{\"a\":1}");
        assert_eq!(values["Note"], "");
    }

    #[test]
    fn test_decode_rejects_non_json_and_non_objects() {
        assert!(matches!(decode_flat("not json"), InferenceResponse::ParseError(_)));
        assert!(matches!(decode_flat("[1, 2]"), InferenceResponse::ParseError(_)));
        assert!(matches!(decode_specs("\"text\""), InferenceResponse::ParseError(_)));
    }

    #[test]
    fn test_decode_specs_handles_mixed_entries() {
        let decoded = decode_specs(
            r#"{"Patient Name": {"original": "Mr. Ali", "new": "Jane Doe"}, "Age": 42, "Ward": {"new": "B"}}"#,
        );
        let InferenceResponse::Specs(specs) = decoded else {
            panic!("expected specs");
        };
        let all: Vec<_> = specs.iter().cloned().collect();
        assert_eq!(
            all,
            vec![
                spec("Patient Name", "Mr. Ali", "Jane Doe"),
                spec("Age", "", "42"),
                spec("Ward", "", "B"),
            ]
        );
    }

    #[test]
    fn test_date_fallback_only_touches_unanswered_date_fields() {
        let mut specs: FieldSpecs = [
            spec("Review Date", "2023-01-01", "Not mentioned"),
            spec("Visit date", "x", ""),
            spec("Diagnosis", "Flu", "Not mentioned"),
            spec("Date of Birth", "1990-01-01", "1985-05-05"),
        ]
        .into_iter()
        .collect();

        let applied = apply_date_fallback(&mut specs, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let values = specs.values();

        assert_eq!(applied, 2);
        assert_eq!(values["Review Date"], "2024-03-09");
        assert_eq!(values["Visit date"], "2024-03-09");
        assert_eq!(values["Diagnosis"], "Not mentioned");
        assert_eq!(values["Date of Birth"], "1985-05-05");
    }

    #[tokio::test]
    async fn test_resolve_fields_skips_call_without_placeholders() {
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let resolver = FieldResolver::new(chat.clone());

        let values = resolver.resolve_fields("text", &[], "").await.unwrap();
        assert!(values.is_empty());
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_fields_degrades_on_bad_json() {
        let chat = Arc::new(ScriptedChat::new(vec![Ok("this is not json".into())]));
        let resolver = FieldResolver::new(chat);

        let values = resolver
            .resolve_fields("text", &["Name".to_string()], "Name: [Name]")
            .await
            .unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_fields_propagates_service_failure() {
        let chat = Arc::new(ScriptedChat::new(vec![Err(InferenceError::EmptyResponse)]));
        let resolver = FieldResolver::new(chat);

        let result = resolver.resolve_fields("text", &["Name".to_string()], "").await;
        assert!(matches!(result, Err(InferenceError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_infer_fields_applies_date_fallback() {
        let chat = Arc::new(ScriptedChat::new(vec![Ok(
            r#"{"Review Date": {"original": "2023-01-01", "new": "Not mentioned"}, "Diagnosis": {"original": "Flu", "new": "Not mentioned"}}"#.into(),
        )]));
        let resolver = FieldResolver::new(chat.clone()).with_clock(fixed_day());

        let specs = resolver.infer_fields("text", "Review Date: 2023-01-01").await.unwrap();
        let values = specs.values();
        assert_eq!(values["Review Date"], "2024-03-09");
        assert_eq!(values["Diagnosis"], "Not mentioned");
        assert_eq!(specs.names(), vec!["Review Date".to_string(), "Diagnosis".to_string()]);
        assert_eq!(chat.last_system().as_deref(), Some(prompts::INFERENCE_INSTRUCTIONS));
    }
}
