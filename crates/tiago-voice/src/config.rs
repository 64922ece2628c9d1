//! Kiosk configuration: one value parameterizing thresholds, windows, lexicons and services.
//!
//! Loaded from an optional TOML file and `TIAGO__*` environment overrides.

use crate::audio::AudioConfig;
use crate::dialogue::DialogueConfig;
use crate::engine::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::listener::ListenConfig;
use crate::segmenter::SegmenterConfig;
use crate::stt::SttConfig;
use crate::voice_output::TtsConfig;
use crate::wake::WakeConfig;
use serde::{Deserialize, Serialize};

/// Default config path (extension resolved by the `config` crate).
pub const DEFAULT_CONFIG_PATH: &str = "config/kiosk";

/// Global kiosk configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub audio: AudioConfig,
    pub segmenter: SegmenterConfig,
    pub listen: ListenConfig,
    pub wake: WakeConfig,
    pub session: SessionConfig,
    pub dialogue: DialogueConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
}

impl KioskConfig {
    /// Load config from file and environment. Precedence: env `TIAGO__*` > file at `TIAGO_CONFIG` (default `config/kiosk`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("TIAGO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let built = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("TIAGO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: KioskConfig = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(VoiceError::Config("audio.sample_rate must be > 0".to_string()));
        }
        if self.audio.chunk_size == 0 {
            return Err(VoiceError::Config("audio.chunk_size must be > 0".to_string()));
        }
        if self.audio.queue_capacity == 0 {
            return Err(VoiceError::Config("audio.queue_capacity must be > 0".to_string()));
        }
        if self.session.max_turns == 0 {
            return Err(VoiceError::Config("session.max_turns must be > 0".to_string()));
        }
        if self.wake.debounce_hits == 0 {
            return Err(VoiceError::Config("wake.debounce_hits must be >= 1".to_string()));
        }
        if self.wake.token.trim().is_empty() {
            return Err(VoiceError::Config("wake.token must not be empty".to_string()));
        }
        for (name, window) in [("wake", &self.listen.wake), ("conversation", &self.listen.conversation)] {
            if window.timeout_seconds <= 0.0 || window.silence_seconds <= 0.0 {
                return Err(VoiceError::Config(format!(
                    "listen.{name} needs positive silence_seconds and timeout_seconds"
                )));
            }
        }
        Ok(())
    }
}
