//! Energy-based speech segmentation with a self-calibrated threshold.
//!
//! Implements the "gap logic" on RMS energy: a chunk at or above the threshold is speech,
//! and a capture ends once `silence_seconds` of sub-threshold audio follow the last speech
//! chunk. Time is counted on the stream clock (samples / sample rate), so a capture is
//! reproducible from its input.

use crate::audio::{rms, AudioSource};
use crate::error::VoiceResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Loudest calibration chunk below this means the microphone is muted or unplugged.
const DEAD_MIC_RMS: f32 = 0.001;
/// Fallback noise level when calibration hears nothing.
const DEAD_MIC_NOISE_LEVEL: f32 = 0.01;
/// Fallback threshold when calibration hears nothing.
const DEAD_MIC_THRESHOLD: f32 = 0.03;
/// Extra wall-clock time granted over the capture timeout before a stalled device is abandoned.
const STALL_GRACE: Duration = Duration::from_secs(1);

/// Configuration for segmentation and loudness normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Minimum RMS for a buffer to count as speech at all (default: 0.01)
    pub min_rms_speech: f32,

    /// Threshold = max(noise_level * noise_multiplier, min_rms_speech) (default: 3.0)
    pub noise_multiplier: f32,

    /// RMS the captured buffer is normalized towards (default: 0.05)
    pub target_rms: f32,

    /// Gain ceiling for normalization (default: 2.5)
    pub max_gain: f32,

    /// Ambient recording length for calibration (default: 2s)
    pub calibration_seconds: f32,

    /// Audio kept from before speech onset (default: 200ms)
    pub pre_roll_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_rms_speech: 0.01,
            noise_multiplier: 3.0,
            target_rms: 0.05,
            max_gain: 2.5,
            calibration_seconds: 2.0,
            pre_roll_ms: 200,
        }
    }
}

/// Result of an ambient calibration pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Mean per-chunk RMS of the ambient recording
    pub noise_level: f32,
    /// RMS at or above which a chunk is speech
    pub volume_threshold: f32,
}

/// A captured utterance, normalized and ready for transcription.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// PCM samples (f32, -1.0..1.0) from speech onset to speech offset.
    pub samples: Vec<f32>,
    /// Sample rate (e.g. 16000).
    pub sample_rate: u32,
    /// Loudest per-chunk RMS seen during the capture.
    pub peak_rms: f32,
    /// Whole-buffer RMS before normalization.
    pub average_rms: f32,
    /// When the capture ended.
    pub captured_at: DateTime<Utc>,
}

impl SpeechSegment {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Silence and timeout bounds for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListenWindow {
    /// Silence after speech that ends the capture
    pub silence_seconds: f32,
    /// Hard cap on the whole capture
    pub timeout_seconds: f32,
}

impl ListenWindow {
    pub fn new(silence_seconds: f32, timeout_seconds: f32) -> Self {
        Self {
            silence_seconds,
            timeout_seconds,
        }
    }
}

/// Why a capture stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Silence,
    Timeout,
    SourceEnded,
    Stalled,
}

/// Energy VAD segmenter over any `AudioSource`.
pub struct Segmenter<S: AudioSource> {
    source: S,
    config: SegmenterConfig,
    calibration: Option<Calibration>,
}

impl<S: AudioSource> Segmenter<S> {
    pub fn new(source: S, config: SegmenterConfig) -> Self {
        Self {
            source,
            config,
            calibration: None,
        }
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    /// Threshold in effect for `listen`.
    pub fn volume_threshold(&self) -> f32 {
        self.calibration
            .map(|c| c.volume_threshold)
            .unwrap_or(self.config.min_rms_speech)
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    /// Give the audio source back (e.g. to read raw chunks after calibrating).
    pub fn into_source(self) -> S {
        self.source
    }

    /// Record ambient audio for `duration` and derive the speech threshold from it.
    pub async fn calibrate(&mut self, duration: Duration) -> VoiceResult<Calibration> {
        info!("🔧 Calibrating microphone ({:.1}s), stay silent...", duration.as_secs_f32());
        self.source.discard_pending();

        let target = seconds_to_samples(duration.as_secs_f64(), self.source.sample_rate());
        let wall_deadline = tokio::time::Instant::now() + duration + STALL_GRACE;
        let mut elapsed = 0usize;
        let mut chunk_rms = Vec::new();

        while elapsed < target {
            let next = tokio::time::timeout_at(wall_deadline, self.source.next_chunk()).await;
            let chunk = match next {
                Ok(result) => match result? {
                    Some(chunk) => chunk,
                    None => break,
                },
                Err(_) => {
                    warn!("Calibration stalled waiting for audio");
                    break;
                }
            };
            elapsed += chunk.samples.len();
            chunk_rms.push(chunk.rms());
        }

        let loudest = chunk_rms.iter().copied().fold(0.0_f32, f32::max);
        let calibration = if chunk_rms.is_empty() || loudest < DEAD_MIC_RMS {
            warn!("⚠️ Microphone seems silent (loudest RMS {:.4}); check input level", loudest);
            Calibration {
                noise_level: DEAD_MIC_NOISE_LEVEL,
                volume_threshold: DEAD_MIC_THRESHOLD,
            }
        } else {
            let noise_level = chunk_rms.iter().sum::<f32>() / chunk_rms.len() as f32;
            Calibration {
                noise_level,
                volume_threshold: (noise_level * self.config.noise_multiplier)
                    .max(self.config.min_rms_speech),
            }
        };

        info!(
            "✅ Calibration OK: noise RMS {:.4}, threshold {:.4}",
            calibration.noise_level, calibration.volume_threshold
        );
        self.calibration = Some(calibration);
        Ok(calibration)
    }

    /// Capture one utterance. Returns `None` when no speech-level audio was heard.
    pub async fn listen(&mut self, window: ListenWindow) -> VoiceResult<Option<SpeechSegment>> {
        if self.calibration.is_none() {
            warn!("listen() before calibrate(); using the speech floor as threshold");
        }
        let threshold = self.volume_threshold();
        let rate = self.source.sample_rate();
        let silence = seconds_to_samples(window.silence_seconds as f64, rate);
        let timeout = seconds_to_samples(window.timeout_seconds as f64, rate);
        let pre_roll_samples = (self.config.pre_roll_ms as usize * rate as usize) / 1000;

        self.source.discard_pending();
        debug!(
            "🎤 Listening (silence {:.1}s, max {:.1}s, threshold {:.4})",
            window.silence_seconds, window.timeout_seconds, threshold
        );

        let wall_deadline = tokio::time::Instant::now()
            + Duration::from_secs_f64(window.timeout_seconds.max(0.0) as f64)
            + STALL_GRACE;
        // stream clock, in samples
        let mut elapsed = 0usize;
        let mut last_speech_at: Option<usize> = None;
        let mut pre_roll: VecDeque<f32> = VecDeque::with_capacity(pre_roll_samples);
        let mut captured: Vec<f32> = Vec::new();
        let mut speech_end = 0usize;
        let mut peak_rms = 0.0_f32;

        let reason = loop {
            if elapsed >= timeout {
                break StopReason::Timeout;
            }
            if let Some(t) = last_speech_at {
                if elapsed - t >= silence {
                    break StopReason::Silence;
                }
            }

            let chunk = match tokio::time::timeout_at(wall_deadline, self.source.next_chunk()).await {
                Ok(result) => match result? {
                    Some(chunk) => chunk,
                    None => break StopReason::SourceEnded,
                },
                Err(_) => break StopReason::Stalled,
            };
            if chunk.samples.is_empty() {
                continue;
            }

            elapsed += chunk.samples.len();
            let level = chunk.rms();

            if level >= threshold {
                if last_speech_at.is_none() {
                    debug!(
                        "🎤 Speech started at {:.2}s (RMS {:.4})",
                        elapsed as f64 / rate as f64,
                        level
                    );
                    captured.extend(pre_roll.drain(..));
                }
                captured.extend_from_slice(&chunk.samples);
                speech_end = captured.len();
                last_speech_at = Some(elapsed);
                peak_rms = peak_rms.max(level);
            } else if last_speech_at.is_some() {
                captured.extend_from_slice(&chunk.samples);
            } else if pre_roll_samples > 0 {
                pre_roll.extend(chunk.samples.iter().copied());
                while pre_roll.len() > pre_roll_samples {
                    pre_roll.pop_front();
                }
            }
        };

        match reason {
            StopReason::Silence => {
                debug!("🤫 Silence of {:.1}s detected after speech", window.silence_seconds)
            }
            StopReason::Timeout => {
                debug!("⏱️ Capture timeout reached ({:.1}s)", window.timeout_seconds)
            }
            StopReason::SourceEnded => debug!("Audio source ended"),
            StopReason::Stalled => warn!("Audio source stalled; ending capture"),
        }

        if last_speech_at.is_none() {
            return Ok(None);
        }
        captured.truncate(speech_end);

        let average_rms = rms(&captured);
        if average_rms < self.config.min_rms_speech {
            debug!(
                "Capture too quiet (RMS {:.4} < {:.4}), ignoring",
                average_rms, self.config.min_rms_speech
            );
            return Ok(None);
        }

        normalize(&mut captured, average_rms, &self.config);

        let segment = SpeechSegment {
            samples: captured,
            sample_rate: rate,
            peak_rms,
            average_rms,
            captured_at: Utc::now(),
        };
        info!(
            "🎯 Speech captured: {:.1}s, avg RMS {:.4}, peak RMS {:.4}",
            segment.duration().as_secs_f32(),
            average_rms,
            peak_rms
        );
        Ok(Some(segment))
    }
}

fn seconds_to_samples(seconds: f64, sample_rate: u32) -> usize {
    (seconds.max(0.0) * sample_rate as f64).round() as usize
}

/// Apply `gain = min(max_gain, target_rms / rms)` and clip to [-1, 1].
fn normalize(samples: &mut [f32], current_rms: f32, config: &SegmenterConfig) {
    if current_rms <= 0.0 {
        return;
    }
    let gain = config.max_gain.min(config.target_rms / current_rms);
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioChunk;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    const RATE: u32 = 16000;
    const CHUNK: usize = 1600; // 100ms

    struct SyntheticSource {
        chunks: VecDeque<Vec<f32>>,
    }

    impl SyntheticSource {
        fn new() -> Self {
            Self { chunks: VecDeque::new() }
        }

        fn level(mut self, amplitude: f32, count: usize) -> Self {
            for _ in 0..count {
                self.chunks.push_back(vec![amplitude; CHUNK]);
            }
            self
        }
    }

    #[async_trait(?Send)]
    impl AudioSource for SyntheticSource {
        fn sample_rate(&self) -> u32 {
            RATE
        }

        async fn next_chunk(&mut self) -> VoiceResult<Option<AudioChunk>> {
            Ok(self.chunks.pop_front().map(AudioChunk::new))
        }
    }

    fn config_without_pre_roll() -> SegmenterConfig {
        SegmenterConfig {
            pre_roll_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn calibration_uses_three_times_noise() {
        let source = SyntheticSource::new().level(0.02, 20);
        let mut seg = Segmenter::new(source, SegmenterConfig::default());
        let cal = seg.calibrate(Duration::from_secs(2)).await.unwrap();
        assert!((cal.noise_level - 0.02).abs() < 1e-5);
        assert!((cal.volume_threshold - 0.06).abs() < 1e-5);
    }

    #[tokio::test]
    async fn calibration_threshold_never_below_speech_floor() {
        let source = SyntheticSource::new().level(0.002, 20);
        let mut seg = Segmenter::new(source, SegmenterConfig::default());
        let cal = seg.calibrate(Duration::from_secs(2)).await.unwrap();
        assert!((cal.volume_threshold - 0.01).abs() < 1e-6);
    }

    #[tokio::test]
    async fn calibration_falls_back_on_dead_microphone() {
        let source = SyntheticSource::new().level(0.0, 20);
        let mut seg = Segmenter::new(source, SegmenterConfig::default());
        let cal = seg.calibrate(Duration::from_secs(2)).await.unwrap();
        assert_eq!(cal.volume_threshold, DEAD_MIC_THRESHOLD);
        assert_eq!(cal.noise_level, DEAD_MIC_NOISE_LEVEL);
    }

    #[tokio::test]
    async fn listen_stops_on_silence_and_ends_at_speech_offset() {
        // 1s silence, 1s speech, then 5s of silence: capture must end 1s after speech.
        let source = SyntheticSource::new()
            .level(0.001, 10)
            .level(0.2, 10)
            .level(0.001, 50);
        let mut seg = Segmenter::new(source, config_without_pre_roll());
        seg.calibrate(Duration::from_millis(0)).await.unwrap();

        let segment = seg
            .listen(ListenWindow::new(1.0, 30.0))
            .await
            .unwrap()
            .expect("speech expected");

        assert_eq!(segment.samples.len(), 10 * CHUNK);
        assert!((segment.duration().as_secs_f32() - 1.0).abs() < 1e-3);
        // gain = min(2.5, 0.05 / 0.2) = 0.25
        assert!(segment.samples.iter().all(|&s| (s - 0.05).abs() < 1e-5));
        assert!((segment.average_rms - 0.2).abs() < 1e-5);
        // 10 silence + 10 speech + 10 trailing silence consumed; the rest is untouched.
        assert_eq!(seg.source.chunks.len(), 40);
    }

    #[tokio::test]
    async fn listen_returns_none_when_only_noise() {
        let source = SyntheticSource::new().level(0.003, 100);
        let mut seg = Segmenter::new(source, SegmenterConfig::default());
        let result = seg.listen(ListenWindow::new(1.0, 3.0)).await.unwrap();
        assert!(result.is_none());
        // 3s timeout = 30 chunks
        assert_eq!(seg.source.chunks.len(), 70);
    }

    #[tokio::test]
    async fn listen_hard_cap_returns_speech_so_far() {
        let source = SyntheticSource::new().level(0.3, 100);
        let mut seg = Segmenter::new(source, config_without_pre_roll());
        let segment = seg
            .listen(ListenWindow::new(1.0, 2.0))
            .await
            .unwrap()
            .expect("speech expected");
        assert_eq!(segment.samples.len(), 20 * CHUNK);
        assert!((segment.peak_rms - 0.3).abs() < 1e-5);
    }

    #[tokio::test]
    async fn pre_roll_keeps_audio_before_onset() {
        let source = SyntheticSource::new()
            .level(0.001, 5)
            .level(0.2, 3)
            .level(0.001, 20);
        let mut seg = Segmenter::new(source, SegmenterConfig::default());
        let segment = seg
            .listen(ListenWindow::new(0.5, 10.0))
            .await
            .unwrap()
            .expect("speech expected");
        // 200ms pre-roll = 2 chunks ahead of 3 speech chunks
        assert_eq!(segment.samples.len(), 5 * CHUNK);
    }

    #[test]
    fn normalization_gain_is_capped() {
        let config = SegmenterConfig::default();
        let mut quiet = vec![0.01_f32; 16];
        normalize(&mut quiet, 0.01, &config);
        // target/rms = 5.0, capped at 2.5
        assert!(quiet.iter().all(|&s| (s - 0.025).abs() < 1e-6));
    }

    #[test]
    fn normalization_clips_to_unit_range() {
        let config = SegmenterConfig {
            target_rms: 1.0,
            max_gain: 10.0,
            ..Default::default()
        };
        let mut samples = vec![0.02, 0.9, -0.9];
        normalize(&mut samples, 0.1, &config);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert_eq!(samples[1], 1.0);
        assert_eq!(samples[2], -1.0);
    }
}
