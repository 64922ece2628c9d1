//! # TIAGO Voice - kiosk conversation engine
//!
//! Voice front-end of the open-day guide robot. It waits for "Bonjour Tiago", runs a
//! short guided dialogue and ends with a confirmed formation (and the colour of the
//! brochure to hand out) or a timeout.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          KioskEngine                             │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────┐  ┌─────────────┐   │
//! │  │  Audio In  │→ │ Segmenter  │→ │   STT    │→ │  WakeGate / │   │
//! │  │   (cpal)   │  │ (RMS VAD)  │  │ (filter) │  │  session    │   │
//! │  └────────────┘  └────────────┘  └──────────┘  └──────┬──────┘   │
//! │                                                       ↓          │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────────────────┐    │
//! │  │ Audio Out  │← │    TTS     │← │ Dialogue → contract +    │    │
//! │  │  (rodio)   │  │            │  │ one repair → formation   │    │
//! │  └────────────┘  └────────────┘  └──────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod contract;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod formation;
pub mod listener;
pub mod prompts;
pub mod repair;
pub mod segmenter;
pub mod session;
pub mod stt;
pub mod voice_output;
pub mod wake;

pub use audio::{AudioChunk, AudioConfig, AudioSource, MicrophoneSource};
pub use config::KioskConfig;
pub use contract::{
    decode, extract, parse, validate_schema, ContractError, Couleur, Dataset, Formation, Proposed,
    StructuredResponse,
};
pub use dialogue::{CompletionRequest, DialogueConfig, DialoguePolicy, OllamaDialogue};
pub use engine::{KioskEngine, SessionConfig, SessionOutcome};
pub use error::{VoiceError, VoiceResult};
pub use formation::detect_formation;
pub use listener::{ListenConfig, ListenMode, MicrophoneListener, UtteranceSource};
pub use repair::request_structured;
pub use segmenter::{Calibration, ListenWindow, Segmenter, SegmenterConfig, SpeechSegment};
pub use session::{ConversationSession, ConversationTurn, Role, SessionState};
pub use stt::{
    create_best_stt, OpenAiStt, PlaceholderStt, SttBackend, SttConfig, Transcript, TranscriptFilter,
    TranscriptSegment,
};
#[cfg(feature = "whisper")]
pub use stt::WhisperStt;
pub use voice_output::{
    create_best_tts, detect_language, OpenAiTts, PlaceholderTts, Speaker, SpeechOutput, TtsBackend,
    TtsConfig, VoiceOutput,
};
pub use wake::{WakeConfig, WakeGate};
