//! Utterance capture: segmenter + transcription + transcript filtering.
//!
//! The conversation loop asks an [`UtteranceSource`] for "what did the visitor say",
//! so scripted sources can stand in for the microphone in tests.

use crate::audio::AudioSource;
use crate::error::VoiceResult;
use crate::segmenter::{ListenWindow, Segmenter};
use crate::stt::{SttBackend, SttConfig, Transcript, TranscriptFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Capture windows per mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Idle mode, waiting for the wake phrase (default: 3s silence, 20s max)
    pub wake: ListenWindow,
    /// Inside a session (default: 2s silence, 30s max)
    pub conversation: ListenWindow,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            wake: ListenWindow::new(3.0, 20.0),
            conversation: ListenWindow::new(2.0, 30.0),
        }
    }
}

impl ListenConfig {
    pub fn window(&self, mode: ListenMode) -> ListenWindow {
        match mode {
            ListenMode::Wake => self.wake,
            ListenMode::Conversation => self.conversation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Wake,
    Conversation,
}

/// Source of visitor utterances.
///
/// An empty transcript means nothing usable was heard. `Stt` errors are recoverable;
/// audio device errors are fatal.
#[async_trait(?Send)]
pub trait UtteranceSource {
    async fn next_utterance(&mut self, mode: ListenMode) -> VoiceResult<Transcript>;
}

/// Microphone-backed utterance source.
pub struct MicrophoneListener<S: AudioSource> {
    segmenter: Segmenter<S>,
    stt: Box<dyn SttBackend>,
    filter: TranscriptFilter,
    language: String,
    windows: ListenConfig,
}

impl<S: AudioSource> MicrophoneListener<S> {
    pub fn new(segmenter: Segmenter<S>, stt: Box<dyn SttBackend>, stt_config: &SttConfig, windows: ListenConfig) -> Self {
        Self {
            segmenter,
            stt,
            filter: TranscriptFilter::from(stt_config),
            language: stt_config.language.clone(),
            windows,
        }
    }

    /// Re-run ambient calibration (e.g. when the hall gets louder).
    pub async fn calibrate(&mut self, duration: Duration) -> VoiceResult<()> {
        self.segmenter.calibrate(duration).await.map(|_| ())
    }

    pub fn segmenter(&self) -> &Segmenter<S> {
        &self.segmenter
    }
}

#[async_trait(?Send)]
impl<S: AudioSource> UtteranceSource for MicrophoneListener<S> {
    async fn next_utterance(&mut self, mode: ListenMode) -> VoiceResult<Transcript> {
        let Some(segment) = self.segmenter.listen(self.windows.window(mode)).await? else {
            debug!("No speech captured ({:?} mode)", mode);
            return Ok(Transcript::empty());
        };

        debug!(
            "Transcribing {:.1}s of speech (peak RMS {:.3})",
            segment.duration().as_secs_f32(),
            segment.peak_rms
        );
        let raw = self.stt.transcribe(&segment, &self.language).await?;
        let transcript = Transcript::from_segments(raw, &self.filter);
        if transcript.is_empty() {
            debug!("Transcript filtered out ({} raw segments)", transcript.segments.len());
        } else {
            info!("👂 Heard: {}", transcript.text);
        }
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioChunk;
    use crate::error::VoiceError;
    use crate::segmenter::SegmenterConfig;
    use crate::stt::{PlaceholderStt, TranscriptSegment};
    use crate::segmenter::SpeechSegment;
    use std::collections::VecDeque;

    const RATE: u32 = 16000;
    const CHUNK: usize = 1600;

    struct ScriptedAudio {
        chunks: VecDeque<Vec<f32>>,
    }

    impl ScriptedAudio {
        fn speech_then_silence(speech_chunks: usize, silent_chunks: usize) -> Self {
            let mut chunks = VecDeque::new();
            chunks.extend((0..speech_chunks).map(|_| vec![0.3; CHUNK]));
            chunks.extend((0..silent_chunks).map(|_| vec![0.0; CHUNK]));
            Self { chunks }
        }
    }

    #[async_trait(?Send)]
    impl AudioSource for ScriptedAudio {
        fn sample_rate(&self) -> u32 {
            RATE
        }

        async fn next_chunk(&mut self) -> VoiceResult<Option<AudioChunk>> {
            Ok(self.chunks.pop_front().map(AudioChunk::new))
        }
    }

    struct FailingStt;

    #[async_trait]
    impl SttBackend for FailingStt {
        async fn transcribe(&self, _: &SpeechSegment, _: &str) -> VoiceResult<Vec<TranscriptSegment>> {
            Err(VoiceError::Stt("service down".into()))
        }
    }

    fn listener(audio: ScriptedAudio, stt: Box<dyn SttBackend>) -> MicrophoneListener<ScriptedAudio> {
        let segmenter = Segmenter::new(audio, SegmenterConfig::default());
        MicrophoneListener::new(segmenter, stt, &SttConfig::default(), ListenConfig::default())
    }

    #[test]
    fn default_windows() {
        let config = ListenConfig::default();
        assert_eq!(config.window(ListenMode::Wake), ListenWindow::new(3.0, 20.0));
        assert_eq!(config.window(ListenMode::Conversation), ListenWindow::new(2.0, 30.0));
    }

    #[tokio::test]
    async fn speech_is_transcribed() {
        let audio = ScriptedAudio::speech_then_silence(8, 25);
        let mut l = listener(audio, Box::new(PlaceholderStt::with_response("bonjour tiago")));
        let transcript = l.next_utterance(ListenMode::Conversation).await.unwrap();
        assert_eq!(transcript.text, "bonjour tiago");
    }

    #[tokio::test]
    async fn silence_yields_empty_without_calling_stt() {
        let audio = ScriptedAudio::speech_then_silence(0, 10);
        let mut l = listener(audio, Box::new(FailingStt));
        let transcript = l.next_utterance(ListenMode::Wake).await.unwrap();
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn stt_failure_is_reported_as_recoverable() {
        let audio = ScriptedAudio::speech_then_silence(8, 25);
        let mut l = listener(audio, Box::new(FailingStt));
        let err = l.next_utterance(ListenMode::Conversation).await.unwrap_err();
        assert!(matches!(err, VoiceError::Stt(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn filtered_noise_is_empty() {
        let audio = ScriptedAudio::speech_then_silence(8, 25);
        let mut l = listener(audio, Box::new(PlaceholderStt::with_response("...")));
        let transcript = l.next_utterance(ListenMode::Conversation).await.unwrap();
        assert!(transcript.is_empty());
    }
}
