//! # Whisper Model
//!
//! Loads a Whisper checkpoint from the HuggingFace hub and runs greedy
//! decoding over 30 second windows of log-mel features using Candle.
//!
//! ## Loading
//! 1. Fetch `config.json`, `tokenizer.json` and `model.safetensors` (cached locally)
//! 2. Build the mel filter bank for the checkpoint's `num_mel_bins`
//! 3. Map the weights onto the selected device
//! 4. Resolve the special tokens used to prompt the decoder
//!
//! ## Decoding:
//! Each window is prompted with `<|startoftranscript|>`, the language token,
//! `<|transcribe|>` and `<|notimestamps|>`. Windows the model marks as
//! no-speech with low confidence are dropped.

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Whisper checkpoint sizes, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

/// `(size, config name, hub repository)`.
const CHECKPOINTS: [(ModelSize, &str, &str); 5] = [
    (ModelSize::Tiny, "tiny", "openai/whisper-tiny"),
    (ModelSize::Base, "base", "openai/whisper-base"),
    (ModelSize::Small, "small", "openai/whisper-small"),
    (ModelSize::Medium, "medium", "openai/whisper-medium"),
    (ModelSize::Large, "large", "openai/whisper-large-v2"),
];

impl ModelSize {
    fn checkpoint(self) -> (&'static str, &'static str) {
        CHECKPOINTS
            .iter()
            .find(|(size, _, _)| *size == self)
            .map(|(_, name, repo)| (*name, *repo))
            .unwrap_or(("base", "openai/whisper-base"))
    }

    pub fn repo_name(&self) -> &'static str {
        self.checkpoint().1
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        CHECKPOINTS
            .iter()
            .find(|(_, name, _)| *name == wanted)
            .map(|(size, _, _)| *size)
            .ok_or_else(|| anyhow!("Unknown Whisper model '{}' (expected tiny, base, small, medium or large)", s))
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.checkpoint().0)
    }
}

const NO_SPEECH_THRESHOLD: f64 = 0.6;
const LOGPROB_THRESHOLD: f64 = -1.0;

/// Token ids the decoder prompt is built from.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    no_speech: Option<u32>,
    language: Option<u32>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer, language: Option<&str>) -> Result<Self> {
        let no_speech = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| tokenizer.token_to_id(token));

        let language = match language {
            Some(code) => {
                let id = tokenizer.token_to_id(&format!("<|{}|>", code.to_lowercase()));
                if id.is_none() {
                    warn!("Tokenizer has no language token for '{}', decoding without one", code);
                }
                id
            }
            None => None,
        };

        Ok(Self {
            sot: token_id(tokenizer, m::SOT_TOKEN)?,
            eot: token_id(tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            no_speech,
            language,
        })
    }

    fn prompt(&self) -> Vec<u32> {
        let mut tokens = vec![self.sot];
        if let Some(language) = self.language {
            tokens.push(language);
        }
        tokens.push(self.transcribe);
        tokens.push(self.no_timestamps);
        tokens
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer has no id for {}", token))
}

/// Result of decoding one 30 second window.
#[derive(Debug)]
struct Segment {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
}

impl Segment {
    fn is_silence(&self) -> bool {
        self.no_speech_prob > NO_SPEECH_THRESHOLD && self.avg_logprob < LOGPROB_THRESHOLD
    }
}

/// A loaded Whisper model ready for transcription.
///
/// Decoding needs `&mut self` because the decoder keeps a cross-attention
/// cache; callers serialize access.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    suppress: Tensor,
}

impl WhisperModel {
    /// Download (or reuse the cached) checkpoint and load it onto `device`.
    pub async fn load(size: ModelSize, device: Device, language: Option<&str>) -> Result<Self> {
        info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new()
                .with_token(std::env::var("HF_TOKEN").ok())
                .with_progress(false);
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                debug!("Using HF cache dir: {}", cache_dir);
                builder = builder.with_cache_dir(cache_dir.into());
            } else if let Ok(hf_home) = std::env::var("HF_HOME") {
                builder = builder.with_cache_dir(std::path::PathBuf::from(hf_home).join("hub"));
            }
            builder.build().context("Failed to create HuggingFace API client")?
        };

        let repo = api.model(size.repo_name().to_string());
        let config_filename = repo
            .get("config.json")
            .await
            .with_context(|| format!("Failed to download config.json from {}", size.repo_name()))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("Failed to download tokenizer.json from {}", size.repo_name()))?;
        let weights_filename = repo
            .get("model.safetensors")
            .await
            .with_context(|| format!("Failed to download model weights from {}", size.repo_name()))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        debug!("Model config: {:?}", config);

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_filters = mel_filter_bank(m::SAMPLE_RATE, m::N_FFT, config.num_mel_bins);

        // SAFETY: the weights file is owned by the hub cache and not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let tokens = SpecialTokens::resolve(&tokenizer, language)?;
        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|id| {
                if config.suppress_tokens.contains(&id) || id == tokens.no_timestamps {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        let suppress = Tensor::new(suppress.as_slice(), &device)?;

        info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            size,
            tokenizer,
            mel_filters,
            tokens,
            suppress,
        })
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Transcribe 16 kHz mono samples. Blocking; run off the async executor.
    pub fn transcribe(&mut self, pcm: &[f32]) -> Result<String> {
        if pcm.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }
        let start_time = std::time::Instant::now();

        let n_mels = self.config.num_mel_bins;
        let mel = m::audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?;

        let content_frames = (pcm.len() / m::HOP_LENGTH).min(frames);
        let mut seek = 0;
        let mut texts = Vec::new();
        while seek < content_frames {
            let segment_size = usize::min(frames - seek, m::N_FRAMES);
            let mel_segment = mel.narrow(2, seek, segment_size)?;
            let segment = self.decode_segment(&mel_segment)?;
            seek += segment_size;

            if segment.is_silence() {
                debug!(
                    no_speech_prob = segment.no_speech_prob,
                    "Skipping window without speech"
                );
                continue;
            }
            let text = segment.text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }

        let text = texts.join(" ");
        debug!(
            "Transcribed {:.2}s of audio in {:.2}s ({} chars)",
            pcm.len() as f64 / m::SAMPLE_RATE as f64,
            start_time.elapsed().as_secs_f64(),
            text.len()
        );
        Ok(text)
    }

    fn decode_segment(&mut self, mel: &Tensor) -> Result<Segment> {
        let audio_features = self.model.encoder.forward(mel, true)?;
        let sample_len = self.config.max_target_positions / 2;

        let mut tokens = self.tokens.prompt();
        let prompt_len = tokens.len();
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                if let Some(no_speech) = self.tokens.no_speech {
                    let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = candle_nn::ops::softmax(&logits, 0)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()? as f64;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress)?;

            let next_token = argmax(&logits.to_vec1::<f32>()?);
            if next_token == self.tokens.eot || tokens.len() > self.config.max_target_positions {
                break;
            }
            if is_repetitive(&tokens[prompt_len..], next_token) {
                debug!("Stopping decode on repeated tokens");
                break;
            }

            let prob = candle_nn::ops::softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;
            sum_logprob += prob.ln();
            tokens.push(next_token);
        }

        let generated = &tokens[prompt_len..];
        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(Segment {
            text,
            avg_logprob: sum_logprob / generated.len().max(1) as f64,
            no_speech_prob,
        })
    }
}

fn argmax(values: &[f32]) -> u32 {
    values
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0 as u32
}

/// True when `new_token` would extend an obvious loop: the same token four
/// times in a row, or the last three tokens repeating.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    let n = tokens.len();
    if n >= 3 && tokens[n - 3..].iter().all(|&t| t == new_token) {
        return true;
    }
    if n >= 5 {
        let candidate = [tokens[n - 2], tokens[n - 1], new_token];
        if tokens[n - 5..n - 2] == candidate {
            return true;
        }
    }
    false
}

/// Slaney-style mel filter bank, `n_mels` rows of `n_fft / 2 + 1` weights.
pub fn mel_filter_bank(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<f32> {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let log_step = (6.4f64).ln() / 27.0;

    let hz_to_mel = |hz: f64| {
        if hz < MIN_LOG_HZ {
            hz / F_SP
        } else {
            MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step
        }
    };
    let mel_to_hz = |mel: f64| {
        if mel < MIN_LOG_MEL {
            mel * F_SP
        } else {
            MIN_LOG_HZ * (log_step * (mel - MIN_LOG_MEL)).exp()
        }
    };

    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let norm = 2.0 / (right - left);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            let weight = lower.min(upper).max(0.0);
            filters[m * n_freqs + k] = (weight * norm) as f32;
        }
    }
    filters
}
