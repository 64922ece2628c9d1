//! TIAGO kiosk: the open-day voice guide.
//!
//! One foreground loop: wait for "Bonjour Tiago", run the conversation, report the
//! chosen formation, go back to idle. Ctrl-C exits; a microphone failure exits non-zero.

use anyhow::Context;
use std::time::Duration;
use tiago_voice::{
    create_best_stt, KioskConfig, KioskEngine, MicrophoneListener, MicrophoneSource, OllamaDialogue,
    Segmenter, SessionOutcome, Speaker,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[tiago-kiosk] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = KioskConfig::load().context("load kiosk config")?;

    let dialogue = OllamaDialogue::new(config.dialogue.clone());
    dialogue
        .ping()
        .await
        .context("dialogue service unavailable; is `ollama serve` running?")?;
    if let Err(e) = dialogue.warm_up().await {
        warn!("⚠️ Warm-up failed: {} (first answer may be slow)", e);
    }

    let stt = create_best_stt(&config.stt);
    let mic = MicrophoneSource::open(&config.audio).context("open microphone")?;
    let mut segmenter = Segmenter::new(mic, config.segmenter.clone());
    segmenter
        .calibrate(Duration::from_secs_f32(config.segmenter.calibration_seconds))
        .await
        .context("calibrate microphone")?;

    let listener = MicrophoneListener::new(segmenter, stt, &config.stt, config.listen.clone());
    let speaker = Speaker::from_config(&config.tts);
    let mut engine = KioskEngine::new(&config, listener, dialogue, speaker);

    info!("🤖 TIAGO ready. Say « Bonjour Tiago » to start (Ctrl+C to stop)");

    loop {
        tokio::select! {
            outcome = engine.run_once() => match outcome {
                Ok(SessionOutcome::Completed { formation, response }) => {
                    let couleur = response.dataset.map(|d| d.couleur.as_str()).unwrap_or("?");
                    info!(
                        formation_id = formation.id(),
                        couleur,
                        "🎁 Hand out one {} brochure ({})",
                        couleur,
                        formation
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("❌ Fatal error: {}", e);
                    return Err(e.into());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("👋 Ctrl-C received; shutting down TIAGO");
                break;
            }
        }
    }
    Ok(())
}
