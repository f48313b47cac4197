//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (`config.toml`)
//! - Environment variables (with `APP_` prefix and `__` between sections)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_INFERENCE__MODEL`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values (defined in the Default impl)
//!
//! The inference API key is deliberately not part of this struct: it is read
//! from `GROQ_API_KEY` only, so it never shows up in `GET /api/v1/config`.

use crate::device::DevicePreference;
use crate::transcription::{ModelSize, TranscriptionConfig};
use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// ## Sections:
/// - **server**: bind address and CORS
/// - **models**: Whisper size, device and language
/// - **inference**: chat-completion endpoint and retry policy
/// - **storage**: template directory, upload limit and artifact expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub inference: InferenceConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind to ("127.0.0.1", "0.0.0.0")
/// - `port`: TCP port to listen on
/// - `cors_origins`: exact origins allowed to call the API from a browser
/// - `cors_origin_pattern`: regex for additional origins (preview deployments)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub cors_origin_pattern: Option<String>,
}

/// Speech model settings.
///
/// ## Fields:
/// - `whisper_model`: "tiny", "base", "small", "medium" or "large"
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `language`: ISO 639-1 code passed to the decoder; empty lets Whisper decide
/// - `ffmpeg_path`: binary used for uploads symphonia cannot decode (Opus);
///   empty disables the fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub device: String,
    pub language: String,
    #[serde(default)]
    pub ffmpeg_path: String,
}

/// Chat-completion settings used for field inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Total attempts per call; `1` disables retries.
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub backoff_base_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            timeout_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

/// Template and artifact storage.
///
/// ## Fields:
/// - `template_dir`: holds the built-in templates and uploaded artifacts
/// - `max_upload_mb`: limit for each multipart upload
/// - `artifact_ttl_secs`: uploaded templates and field metadata older than this are swept
/// - `sweep_interval_secs`: how often the sweep runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub template_dir: String,
    pub max_upload_mb: usize,
    pub artifact_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl StorageConfig {
    pub fn template_path(&self) -> PathBuf {
        PathBuf::from(&self.template_dir)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                    "https://ai-doc-engine.vercel.app".to_string(),
                    "https://ai-doc-engine-git-main-sobandev.vercel.app".to_string(),
                ],
                cors_origin_pattern: Some(r"^https://.*\.vercel\.app$".to_string()),
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),
                device: "auto".to_string(),
                language: "en".to_string(),
                ffmpeg_path: "ffmpeg".to_string(),
            },
            inference: InferenceConfig::default(),
            storage: StorageConfig {
                template_dir: "backend/templates".to_string(),
                max_upload_mb: 50,
                artifact_ttl_secs: 24 * 60 * 60,
                sweep_interval_secs: 60 * 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_MODELS__WHISPER_MODEL=small`: Override whisper model
    /// - `APP_INFERENCE__MAX_ATTEMPTS=1`: Single-attempt inference calls
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if let Some(pattern) = &self.server.cors_origin_pattern {
            Regex::new(pattern).map_err(|e| anyhow!("Invalid CORS origin pattern: {}", e))?;
        }

        self.models.whisper_model.parse::<ModelSize>()?;

        if self.inference.api_url.trim().is_empty() {
            return Err(anyhow!("Inference API URL cannot be empty"));
        }

        if self.inference.timeout_secs == 0 {
            return Err(anyhow!("Inference timeout must be greater than 0"));
        }

        if self.inference.max_attempts == 0 {
            return Err(anyhow!("Inference max attempts must be at least 1"));
        }

        if self.storage.template_dir.trim().is_empty() {
            return Err(anyhow!("Template directory cannot be empty"));
        }

        if self.storage.max_upload_mb == 0 {
            return Err(anyhow!("Max upload size must be greater than 0"));
        }

        if self.storage.sweep_interval_secs == 0 {
            return Err(anyhow!("Artifact sweep interval must be greater than 0"));
        }

        Ok(())
    }

    /// Configured language, or `None` when left empty.
    pub fn language(&self) -> Option<String> {
        let language = self.models.language.trim();
        (!language.is_empty()).then(|| language.to_string())
    }

    /// ffmpeg binary for the audio fallback, or `None` when disabled.
    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        let path = self.models.ffmpeg_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    /// Settings for the speech engine, derived from the `models` section.
    pub fn transcription_config(&self) -> Result<TranscriptionConfig> {
        Ok(TranscriptionConfig {
            model_size: self.models.whisper_model.parse()?,
            device: DevicePreference::from_config(&self.models.device),
            language: self.language(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.models.whisper_model, "base");
        assert_eq!(config.inference.model, "llama-3.3-70b-versatile");
        assert_eq!(config.inference.max_attempts, 3);
        assert_eq!(config.storage.max_upload_bytes(), 50 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.inference.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.cors_origin_pattern = Some("(".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.template_dir = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_origin_pattern_matches_previews() {
        let config = AppConfig::default();
        let pattern = Regex::new(config.server.cors_origin_pattern.as_deref().unwrap()).unwrap();
        assert!(pattern.is_match("https://ai-doc-engine-pr-7.vercel.app"));
        assert!(!pattern.is_match("http://evil.example.com"));
    }

    #[test]
    fn test_transcription_config_from_models() {
        let mut config = AppConfig::default();
        config.models.whisper_model = "small".to_string();
        config.models.device = "cpu".to_string();
        let transcription = config.transcription_config().unwrap();
        assert_eq!(transcription.model_size, ModelSize::Small);
        assert_eq!(transcription.device, DevicePreference::Cpu);
        assert_eq!(transcription.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_empty_language_means_auto() {
        let mut config = AppConfig::default();
        assert_eq!(config.language().as_deref(), Some("en"));
        config.models.language = "  ".to_string();
        assert_eq!(config.language(), None);
    }

    #[test]
    fn test_empty_ffmpeg_path_disables_fallback() {
        let mut config = AppConfig::default();
        assert_eq!(config.ffmpeg_path(), Some(PathBuf::from("ffmpeg")));
        config.models.ffmpeg_path = String::new();
        assert_eq!(config.ffmpeg_path(), None);
    }
}
