//! Audio capture using CPAL
//!
//! One input stream lives for the whole process. The CPAL callback thread slices the
//! device signal into fixed-size mono chunks and pushes them through a bounded queue;
//! the segmenter pulls from that queue on the conversational task.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Audio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of device channels (default: 1). Multi-channel input is down-mixed to mono.
    pub channels: u16,

    /// Chunk size in mono samples (default: 1024, 64ms at 16kHz)
    pub chunk_size: usize,

    /// Chunks buffered between the device callback and the segmenter (default: 64)
    pub queue_capacity: usize,

    /// Input device name; the host default is used when unset
    pub device_name: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            queue_capacity: 64,
            device_name: None,
        }
    }
}

/// Audio chunk sent from the capture thread
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,

    /// Timestamp when captured
    pub timestamp: std::time::Instant,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Root-mean-square energy of normalized samples. Empty input is silent.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// A pull-based source of fixed-size mono chunks.
///
/// `Ok(None)` means the source is exhausted; device failures are `Err` and are fatal.
#[async_trait(?Send)]
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    async fn next_chunk(&mut self) -> VoiceResult<Option<AudioChunk>>;

    /// Drop chunks buffered before this call (e.g. captured while the kiosk was talking).
    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Chunks dropped on a full queue since the last drain. One overflow episode runs
/// from the first drop to the next `take`.
#[derive(Debug, Default)]
struct Overflow(AtomicUsize);

impl Overflow {
    /// Count one dropped chunk. True for the first drop of an episode.
    fn record(&self) -> bool {
        self.0.fetch_add(1, Ordering::Relaxed) == 0
    }

    /// Close the episode and return how many chunks it dropped.
    fn take(&self) -> usize {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Microphone capture through CPAL with a bounded chunk queue.
pub struct MicrophoneSource {
    config: AudioConfig,
    chunk_rx: mpsc::Receiver<VoiceResult<AudioChunk>>,
    deferred_error: Option<VoiceError>,
    overflow: Arc<Overflow>,
    _stream: Stream,
}

impl MicrophoneSource {
    /// Open the configured (or default) input device and start streaming.
    pub fn open(config: &AudioConfig) -> VoiceResult<Self> {
        info!(
            "🎤 Initializing audio capture ({}Hz, {} channels, {} samples/chunk)",
            config.sample_rate, config.channels, config.chunk_size
        );

        let host = cpal::default_host();
        let device = match config.device_name.as_deref() {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| VoiceError::AudioDevice(format!("Input device not found: {}", wanted)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?,
        };

        info!("📱 Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));
        let default_config = device.default_input_config()?;
        debug!("🔧 Default config: {:?}", default_config);

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(config.queue_capacity);
        let err_tx = chunk_tx.clone();
        let chunk_size = config.chunk_size;
        let channels = config.channels.max(1) as usize;
        let mut sample_buffer = Vec::with_capacity(chunk_size);
        let overflow = Arc::new(Overflow::default());
        let callback_overflow = Arc::clone(&overflow);

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                    sample_buffer.push(mono);

                    if sample_buffer.len() >= chunk_size {
                        let chunk = AudioChunk::new(std::mem::replace(
                            &mut sample_buffer,
                            Vec::with_capacity(chunk_size),
                        ));
                        if let Err(TrySendError::Full(_)) = chunk_tx.try_send(Ok(chunk)) {
                            if callback_overflow.record() {
                                warn!("⚠️ Capture queue full, dropping audio until the next listen");
                            }
                        }
                    }
                }
            },
            move |err| {
                let _ = err_tx.try_send(Err(VoiceError::AudioStream(err.to_string())));
            },
            None,
        )?;

        stream.play()?;
        info!("✅ Audio capture started");

        Ok(Self {
            config: config.clone(),
            chunk_rx,
            deferred_error: None,
            overflow,
            _stream: stream,
        })
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

#[async_trait(?Send)]
impl AudioSource for MicrophoneSource {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    async fn next_chunk(&mut self) -> VoiceResult<Option<AudioChunk>> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }
        match self.chunk_rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Err(VoiceError::AudioDevice("Capture stream closed".to_string())),
        }
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(item) = self.chunk_rx.try_recv() {
            match item {
                Ok(_) => dropped += 1,
                Err(e) => {
                    // surfaced by the next read
                    self.deferred_error.get_or_insert(e);
                }
            }
        }
        let overflowed = self.overflow.take();
        if dropped > 0 || overflowed > 0 {
            debug!("Discarded {} buffered chunks ({} dropped on a full queue)", dropped, overflowed);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn overflow_warns_once_per_episode() {
        let overflow = Overflow::default();
        assert!(overflow.record());
        for _ in 0..900 {
            assert!(!overflow.record());
        }
        assert_eq!(overflow.take(), 901);
        assert_eq!(overflow.take(), 0);
        assert!(overflow.record());
    }

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert!((rms(&[0.5; 320]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.25; 320]) - 0.25).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_wave() {
        let square: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((rms(&square) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_list_devices() {
        // This might fail in CI environments without audio devices
        let result = MicrophoneSource::list_input_devices();
        if let Ok(devices) = result {
            println!("Available input devices: {:?}", devices);
        }
    }
}
