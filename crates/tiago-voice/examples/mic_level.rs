//! Example: live microphone level
//!
//! Prints per-chunk RMS against the calibrated threshold so the segmenter can be tuned
//! on site. Run with `cargo run --example mic_level`, stop with Ctrl+C.

use std::time::Duration;
use tiago_voice::{AudioSource, KioskConfig, MicrophoneSource, Segmenter};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = KioskConfig::load()?;
    info!("Input devices: {:?}", MicrophoneSource::list_input_devices()?);

    let mic = MicrophoneSource::open(&config.audio)?;
    let mut segmenter = Segmenter::new(mic, config.segmenter.clone());
    let calibration = segmenter
        .calibrate(Duration::from_secs_f32(config.segmenter.calibration_seconds))
        .await?;
    let threshold = calibration.volume_threshold;

    let mut mic = segmenter.into_source();
    info!("Speak now. '#' marks speech-level chunks (threshold {:.4})", threshold);

    loop {
        tokio::select! {
            chunk = mic.next_chunk() => {
                let Some(chunk) = chunk? else { break };
                let level = chunk.rms();
                let bar = "█".repeat(((level / 0.2).min(1.0) * 50.0) as usize);
                let marker = if level >= threshold { '#' } else { ' ' };
                println!("{} {:.4} {}", marker, level, bar);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
