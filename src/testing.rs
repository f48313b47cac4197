//! In-process fakes for the transcription and inference collaborators.

use crate::inference::{ChatCompletion, InferenceError};
use crate::transcription::Transcriber;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replies with queued responses in order, then with `EmptyResponse`.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, InferenceError>>>,
    calls: AtomicUsize,
    last_system: Mutex<Option<String>>,
    available: bool,
}

impl ScriptedChat {
    pub fn new(replies: Vec<Result<String, InferenceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            last_system: Mutex::new(None),
            available: true,
        }
    }

    /// Behaves as if no API key is configured.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_system(&self) -> Option<String> {
        self.last_system.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn complete_json(&self, system: &str, _user: &str) -> Result<String, InferenceError> {
        if !self.available {
            return Err(InferenceError::MissingCredential);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system.lock().unwrap() = Some(system.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(InferenceError::EmptyResponse))
    }
}

/// Returns a fixed transcript, or fails when built with [`FakeTranscriber::failing`].
pub struct FakeTranscriber {
    transcript: Option<String>,
    calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            transcript: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: &[f32]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if audio.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }
        self.transcript
            .clone()
            .ok_or_else(|| anyhow!("model failed to decode"))
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
