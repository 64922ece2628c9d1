//! Error types for the kiosk voice engine

use crate::contract::ContractError;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the kiosk voice engine
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Dialogue service unavailable: {0}")]
    DialogueUnavailable(String),

    #[error("Structured output still invalid after repair (first: {initial}; repaired: {repaired})")]
    RepairFailure {
        initial: ContractError,
        repaired: ContractError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Device failures end the process; everything else is answered in-session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::AudioDevice(_) | VoiceError::AudioStream(_) | VoiceError::Config(_)
        )
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_fatal() {
        assert!(VoiceError::AudioDevice("no mic".into()).is_fatal());
        assert!(VoiceError::AudioStream("overrun".into()).is_fatal());
    }

    #[test]
    fn collaborator_errors_are_recoverable() {
        assert!(!VoiceError::DialogueUnavailable("timeout".into()).is_fatal());
        assert!(!VoiceError::Stt("502".into()).is_fatal());
        let repair = VoiceError::RepairFailure {
            initial: ContractError::Extraction,
            repaired: ContractError::Extraction,
        };
        assert!(!repair.is_fatal());
    }
}
