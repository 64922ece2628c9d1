//! **VoiceOutput**: speech synthesis and playback of the kiosk's answers.
//!
//! A [`TtsBackend`] turns text into encoded audio (MP3/WAV), [`VoiceOutput`] plays it on
//! a `rodio::Sink`, and [`Speaker`] ties both behind the [`SpeechOutput`] seam used by
//! the conversation engine.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Common English words; two or more in an answer switch speech to English.
const ENGLISH_MARKERS: &[&str] = &[
    "the", "and", "you", "are", "have", "this", "that", "with", "from", "what", "your",
];

/// Pick the speech language for a text: `"en"` when at least two common English
/// words appear, `"fr"` otherwise.
pub fn detect_language(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let hits = lowered
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| ENGLISH_MARKERS.contains(w))
        .count();
    if hits >= 2 {
        "en"
    } else {
        "fr"
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// OpenAI-compatible base URL (overridden by `TTS_API_URL`)
    pub api_url: String,
    /// tts-1 (fast) or tts-1-hd (higher quality)
    pub model: String,
    /// Voice for French answers
    pub voice: String,
    /// Voice for English answers
    pub english_voice: String,
    pub timeout_seconds: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            model: "tts-1".to_string(),
            voice: "nova".to_string(),
            english_voice: "alloy".to_string(),
            timeout_seconds: 60,
        }
    }
}

/// Backend that turns text into audio bytes (WAV/MP3).
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize text in `language`. Return an empty vec to skip playback.
    async fn synthesize(&self, text: &str, language: &str) -> VoiceResult<Vec<u8>>;
}

/// Placeholder TTS: returns empty audio so nothing plays. The kiosk then only logs its answers.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str, _language: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Production TTS backend: OpenAI-compatible `/audio/speech`.
/// Uses `TTS_API_URL`, `TTS_API_KEY`, `TTS_MODEL` and `TTS_VOICE`, falling back to the config values.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub english_voice: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn from_env(config: &TtsConfig) -> VoiceResult<Self> {
        let base_url = std::env::var("TTS_API_URL").unwrap_or_else(|_| config.api_url.clone());
        let api_key = std::env::var("TTS_API_KEY")
            .map_err(|_| VoiceError::Config("TTS requires TTS_API_KEY".to_string()))?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| config.model.clone());
        let voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| config.voice.clone());
        Ok(Self::new(base_url, api_key, model, voice, config))
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        config: &TtsConfig,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            english_voice: config.english_voice.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            client: reqwest::Client::new(),
        }
    }

    fn voice_for(&self, language: &str) -> &str {
        if language == "en" {
            &self.english_voice
        } else {
            &self.voice
        }
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize(&self, text: &str, language: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice_for(language),
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Create the best available TTS backend: OpenAiTts if `TTS_API_KEY` is set, else PlaceholderTts.
pub fn create_best_tts(config: &TtsConfig) -> Box<dyn TtsBackend> {
    match OpenAiTts::from_env(config) {
        Ok(remote) => Box::new(remote),
        Err(e) => {
            warn!("Remote TTS unavailable ({}); answers will only be logged", e);
            Box::new(PlaceholderTts)
        }
    }
}

/// Manages playback of TTS audio on the default output device.
pub struct VoiceOutput {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl VoiceOutput {
    /// Create a new VoiceOutput (default output device).
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("🔊 VoiceOutput: sink ready for TTS playback");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }

    /// Queue pre-encoded audio bytes (WAV/MP3).
    pub fn play_bytes(&self, bytes: &[u8]) -> VoiceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let cursor = Cursor::new(bytes.to_vec());
        let source = rodio::Decoder::new(cursor)
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    /// Whether the sink currently has queued samples (playing or pending).
    pub fn is_playing(&self) -> bool {
        !self.sink.empty()
    }

    /// Wait for the queue to drain without blocking the runtime thread.
    pub async fn wait_until_end(&self) {
        while self.is_playing() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn stop(&self) {
        self.sink.stop();
    }
}

/// Where the engine sends what the kiosk says. Returns once playback has ended.
#[async_trait(?Send)]
pub trait SpeechOutput {
    async fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()>;
}

/// Synthesis backend plus (optional) playback device.
pub struct Speaker {
    tts: Box<dyn TtsBackend>,
    output: Option<VoiceOutput>,
}

impl Speaker {
    pub fn new(tts: Box<dyn TtsBackend>, output: Option<VoiceOutput>) -> Self {
        Self { tts, output }
    }

    /// Best TTS backend on the default output device. Without a device the kiosk runs text-only.
    pub fn from_config(config: &TtsConfig) -> Self {
        let output = match VoiceOutput::new() {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("⚠️ No audio output ({}); running text-only", e);
                None
            }
        };
        Self::new(create_best_tts(config), output)
    }
}

#[async_trait(?Send)]
impl SpeechOutput for Speaker {
    async fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()> {
        info!("🤖 TIAGO [{}]: {}", language, text);
        let Some(output) = &self.output else {
            return Ok(());
        };
        let bytes = self.tts.synthesize(text, language).await?;
        if bytes.is_empty() {
            debug!("TTS returned no audio");
            return Ok(());
        }
        output.play_bytes(&bytes)?;
        output.wait_until_end().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_tts_returns_empty() {
        let tts = PlaceholderTts;
        let out = tts.synthesize("bonjour", "fr").await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn french_answers_stay_french() {
        assert_eq!(detect_language("Je vous propose le Programme Grande Ecole."), "fr");
        assert_eq!(detect_language(""), "fr");
    }

    #[test]
    fn two_english_markers_switch_to_english() {
        assert_eq!(detect_language("What would you like to study?"), "en");
        assert_eq!(detect_language("The Bachelor is great"), "fr");
    }

    #[test]
    fn voice_follows_language() {
        let tts = OpenAiTts::new("https://example.test/v1/", "k", "tts-1", "nova", &TtsConfig::default());
        assert_eq!(tts.base_url, "https://example.test/v1");
        assert_eq!(tts.voice_for("en"), "alloy");
        assert_eq!(tts.voice_for("fr"), "nova");
    }

    #[tokio::test]
    async fn speaker_without_device_only_logs() {
        let mut speaker = Speaker::new(Box::new(PlaceholderTts), None);
        assert!(speaker.speak("Bonjour", "fr").await.is_ok());
    }
}
