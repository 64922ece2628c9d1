//! **Speech-to-Text (STT)**: convert a `SpeechSegment` into scored text segments.
//!
//! Implement `SttBackend` for local Whisper (e.g. whisper-rs) or a remote
//! OpenAI-compatible transcription API. Backends return every segment they decode;
//! `TranscriptFilter` decides which ones are trusted enough to reach the dialogue.

use crate::error::{VoiceError, VoiceResult};
use crate::segmenter::SpeechSegment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Transcription settings and segment filter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Language hint passed to the backend (default: "fr")
    pub language: String,
    /// Vocabulary prompt biasing the decoder towards expected words
    pub initial_prompt: String,
    /// Segments with a higher no-speech probability are dropped (default: 0.4)
    pub max_no_speech_prob: f32,
    /// Segments with a lower average log-probability are dropped (default: -1.0)
    pub min_avg_logprob: f32,
    /// Remote API base URL; `STT_API_URL` overrides
    pub api_url: String,
    /// Remote model name; `STT_MODEL` overrides
    pub model: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            language: "fr".to_string(),
            initial_prompt: "Bonjour Tiago, CESI, formation".to_string(),
            max_no_speech_prob: 0.4,
            min_avg_logprob: -1.0,
            api_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// One decoded piece of speech with its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Average token log-probability, when the backend reports it.
    pub confidence: Option<f32>,
    /// Probability that the segment is not speech at all.
    pub no_speech_prob: f32,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            no_speech_prob: 0.0,
        }
    }
}

/// Filtered text of one utterance plus the raw segments it came from. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A transcript carrying `text` as a single fully trusted segment.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            segments: vec![TranscriptSegment::new(text.clone())],
            text,
        }
    }

    /// Build a transcript from raw backend segments, keeping only trusted ones.
    pub fn from_segments(segments: Vec<TranscriptSegment>, filter: &TranscriptFilter) -> Self {
        let joined = segments
            .iter()
            .filter(|seg| filter.accepts(seg))
            .map(|seg| seg.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let joined = joined.trim();
        let text = if joined.chars().count() < 2 {
            String::new()
        } else {
            joined.to_string()
        };
        Self { text, segments }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Segment acceptance rules applied between the backend and the conversation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscriptFilter {
    pub max_no_speech_prob: f32,
    pub min_avg_logprob: f32,
    pub min_chars: usize,
}

impl Default for TranscriptFilter {
    fn default() -> Self {
        Self {
            max_no_speech_prob: 0.4,
            min_avg_logprob: -1.0,
            min_chars: 3,
        }
    }
}

impl From<&SttConfig> for TranscriptFilter {
    fn from(config: &SttConfig) -> Self {
        Self {
            max_no_speech_prob: config.max_no_speech_prob,
            min_avg_logprob: config.min_avg_logprob,
            ..Default::default()
        }
    }
}

impl TranscriptFilter {
    pub fn accepts(&self, segment: &TranscriptSegment) -> bool {
        if segment.no_speech_prob > self.max_no_speech_prob {
            debug!("STT: dropping segment (no_speech {:.2}): {:?}", segment.no_speech_prob, segment.text);
            return false;
        }
        if let Some(logprob) = segment.confidence {
            if logprob < self.min_avg_logprob {
                debug!("STT: dropping low-confidence segment ({:.2}): {:?}", logprob, segment.text);
                return false;
            }
        }
        let text = segment.text.trim();
        if text.chars().count() < self.min_chars {
            return false;
        }
        if text.chars().all(|c| c.is_ascii_punctuation() || c == '…' || c.is_whitespace()) {
            return false;
        }
        // CJK and other scripts past U+3000 are hallucinations for a French kiosk
        if text.chars().any(|c| c as u32 > 0x3000) {
            debug!("STT: dropping out-of-script segment: {:?}", text);
            return false;
        }
        true
    }
}

/// Backend for converting captured speech to text segments.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one segment. Return an empty list if nothing was decoded.
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language_hint: &str,
    ) -> VoiceResult<Vec<TranscriptSegment>>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Placeholder STT: returns a fixed response (or nothing). Use to run the kiosk loop without a model.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// If set, every capture transcribes to this text.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        _language_hint: &str,
    ) -> VoiceResult<Vec<TranscriptSegment>> {
        debug!(
            "STT placeholder: {} samples, {:.1}s",
            segment.samples.len(),
            segment.duration().as_secs_f32()
        );
        Ok(self
            .response
            .iter()
            .map(|r| TranscriptSegment::new(r.clone()))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    text: String,
    #[serde(default)]
    avg_logprob: Option<f32>,
    #[serde(default)]
    no_speech_prob: f32,
}

/// Production STT backend: OpenAI-compatible transcription API (`verbose_json` for per-segment scores).
/// Uses `STT_API_URL`, `STT_API_KEY` and `STT_MODEL`, falling back to the config values.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1, etc.
    pub model: String,
    /// Vocabulary prompt.
    pub prompt: String,
    client: reqwest::Client,
}

impl OpenAiStt {
    /// Build from environment: STT_API_URL, STT_API_KEY, STT_MODEL.
    pub fn from_env(config: &SttConfig) -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL").unwrap_or_else(|_| config.api_url.clone());
        let api_key = std::env::var("STT_API_KEY")
            .map_err(|_| VoiceError::Config("STT requires STT_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| config.model.clone());
        Self::new(base_url, api_key, model, config)
    }

    /// Create with explicit endpoint and key.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        config: &SttConfig,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            prompt: config.initial_prompt.clone(),
            client,
        })
    }
}

#[async_trait]
impl SttBackend for OpenAiStt {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language_hint: &str,
    ) -> VoiceResult<Vec<TranscriptSegment>> {
        if segment.is_empty() {
            return Ok(Vec::new());
        }
        let wav = pcm_f32_to_wav(&segment.samples, segment.sample_rate);
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language_hint.to_string())
            .text("prompt", self.prompt.clone())
            .text("response_format", "verbose_json");
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let body: VerboseTranscription = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        if body.segments.is_empty() {
            let text = body.text.trim();
            if text.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![TranscriptSegment::new(text)]);
        }
        Ok(body
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                text: s.text,
                confidence: s.avg_logprob,
                no_speech_prob: s.no_speech_prob,
            })
            .collect())
    }
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml; see README.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper STT: loads a ggml model once at start-up and runs inference on-device.
    /// Audio must be 16 kHz mono f32.
    pub struct WhisperStt {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
        prompt: String,
    }

    impl WhisperStt {
        /// Load the Whisper model from `model_path` (e.g. path to ggml-small.bin).
        pub fn new(model_path: &str, config: &SttConfig) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Stt(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Stt(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Mutex::new(state),
                prompt: config.initial_prompt.clone(),
            })
        }

        /// Build from env: `WHISPER_MODEL_PATH` must point to a .bin model file.
        pub fn from_env(config: &SttConfig) -> VoiceResult<Self> {
            let path = std::env::var("WHISPER_MODEL_PATH")
                .map_err(|_| VoiceError::Config("WHISPER_MODEL_PATH not set".to_string()))?;
            let path = path.trim();
            if path.is_empty() {
                return Err(VoiceError::Config("WHISPER_MODEL_PATH is empty".to_string()));
            }
            Self::new(path, config)
        }
    }

    #[async_trait]
    impl SttBackend for WhisperStt {
        async fn transcribe(
            &self,
            segment: &SpeechSegment,
            language_hint: &str,
        ) -> VoiceResult<Vec<TranscriptSegment>> {
            if segment.is_empty() {
                return Ok(Vec::new());
            }
            if segment.sample_rate != 16000 {
                return Err(VoiceError::Stt(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    segment.sample_rate
                )));
            }
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(Some(language_hint));
            params.set_initial_prompt(&self.prompt);

            let mut state = self
                .state
                .lock()
                .map_err(|e| VoiceError::Stt(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(&params, &segment.samples)
                .map_err(|e| VoiceError::Stt(format!("Whisper inference failed: {}", e)))?;
            Ok(state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok().map(TranscriptSegment::new))
                .collect())
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperStt;

/// Create the best available STT backend.
/// Priority: (1) WhisperStt if `WHISPER_MODEL_PATH` is set and the model loads (requires `whisper` feature),
/// (2) OpenAiStt if `STT_API_KEY` is set, (3) PlaceholderStt.
pub fn create_best_stt(config: &SttConfig) -> Box<dyn SttBackend> {
    #[cfg(feature = "whisper")]
    {
        match whisper_stt::WhisperStt::from_env(config) {
            Ok(w) => return Box::new(w),
            Err(e) => tracing::warn!("Whisper STT unavailable: {}", e),
        }
    }
    match OpenAiStt::from_env(config) {
        Ok(remote) => Box::new(remote),
        Err(e) => {
            tracing::warn!("Remote STT unavailable ({}); using placeholder", e);
            Box::new(PlaceholderStt::new())
        }
    }
}
