//! **KioskEngine**: the conversation state machine.
//!
//! ```text
//! IDLE_WAKE_WAIT → GREETING → AWAITING_USER ⇄ HANDOFF
//!                                  │
//!                                  ├→ DONE          (formation confirmed)
//!                                  └→ TIMEOUT_ABORT (turn budget spent)
//! ```
//!
//! One session at a time. Capture, dialogue calls and speech are awaited in sequence;
//! nothing survives a session except the engine's collaborators.

use crate::config::KioskConfig;
use crate::contract::{Formation, StructuredResponse};
use crate::dialogue::{CompletionRequest, DialoguePolicy};
use crate::error::VoiceResult;
use crate::formation::{contains_phrase, detect_formation, normalize};
use crate::listener::{ListenMode, UtteranceSource};
use crate::prompts;
use crate::repair::request_structured;
use crate::session::{ConversationSession, SessionState};
use crate::voice_output::{detect_language, SpeechOutput};
use crate::wake::WakeGate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Shortest user input worth a dialogue turn.
const MIN_UTTERANCE_CHARS: usize = 3;

const CONFIRMATION_WORDS: &[&str] = &[
    "oui", "ouais", "ouaip", "d accord", "ok", "okay", "go", "parfait", "ca me va",
    "ca me convient", "ca marche", "tres bien", "volontiers", "bien sur", "exactement",
    "je confirme", "c est bon", "allons y", "carrement", "yes",
];

/// Negations that cancel a confirmation. A leading "non" is checked separately.
const REJECTION_WORDS: &[&str] = &[
    "pas d accord", "pas ca", "pas celle la", "pas celui la", "pas vraiment", "pas du tout",
    "pas pour moi", "plutot pas", "ne me va pas", "ne me convient pas", "pas convaincu",
    "pas convaincue", "autre chose",
];

const HANDOFF_WORDS: &[&str] = &[
    "tarif", "tarifs", "prix", "combien", "cout", "frais", "date", "dates", "inscription",
    "inscriptions", "inscrire", "admission", "admissions", "bourse", "logement", "meteo",
    "football", "blague", "politique", "recette", "film", "chanson",
];

/// Conversation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Dialogue turns before the session is aborted (default: 10)
    pub max_turns: u32,
    /// Turns kept after the first one when the history is truncated (default: 12)
    pub history_window: usize,
    /// Empty captures in a row after which the visitor is considered gone (default: 3)
    pub max_consecutive_silences: u32,
    /// Answers accepting a proposed formation
    pub confirmation_lexicon: Vec<String>,
    /// Negations that cancel a confirmation ("oui mais pas ça")
    pub rejection_lexicon: Vec<String>,
    /// Practical or off-topic subjects redirected to the staff without asking the model
    pub handoff_lexicon: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            history_window: 12,
            max_consecutive_silences: 3,
            confirmation_lexicon: owned(CONFIRMATION_WORDS),
            rejection_lexicon: owned(REJECTION_WORDS),
            handoff_lexicon: owned(HANDOFF_WORDS),
        }
    }
}

impl SessionConfig {
    pub fn is_confirmation(&self, text: &str) -> bool {
        let t = normalize(text);
        let refused = t.starts_with(" non ") || self.rejection_lexicon.iter().any(|w| contains_phrase(&t, w));
        !refused && self.confirmation_lexicon.iter().any(|w| contains_phrase(&t, w))
    }

    pub fn is_handoff(&self, text: &str) -> bool {
        let t = normalize(text);
        self.handoff_lexicon.iter().any(|w| contains_phrase(&t, w))
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The visitor confirmed a formation; `response` is the closing answer.
    Completed {
        formation: Formation,
        response: StructuredResponse,
    },
    /// Turn budget exhausted without a confirmation.
    TimedOut,
    /// Nobody answered for several captures in a row.
    Abandoned,
}

impl SessionOutcome {
    pub fn formation_id(&self) -> Option<u8> {
        match self {
            SessionOutcome::Completed { formation, .. } => Some(formation.id()),
            _ => None,
        }
    }
}

/// The kiosk: wake gate, one conversation at a time, and its collaborators.
pub struct KioskEngine<U, P, O>
where
    U: UtteranceSource,
    P: DialoguePolicy,
    O: SpeechOutput,
{
    listener: U,
    policy: P,
    speech: O,
    wake: WakeGate,
    config: SessionConfig,
    temperature: f32,
    state: SessionState,
}

impl<U, P, O> KioskEngine<U, P, O>
where
    U: UtteranceSource,
    P: DialoguePolicy,
    O: SpeechOutput,
{
    pub fn new(config: &KioskConfig, listener: U, policy: P, speech: O) -> Self {
        Self {
            listener,
            policy,
            speech,
            wake: WakeGate::new(&config.wake),
            config: config.session.clone(),
            temperature: config.dialogue.temperature,
            state: SessionState::IdleWakeWait,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn speech(&self) -> &O {
        &self.speech
    }

    pub fn listener_mut(&mut self) -> &mut U {
        &mut self.listener
    }

    fn enter(&mut self, session: &mut ConversationSession, state: SessionState) {
        session.set_state(state);
        self.state = state;
    }

    /// Say something; playback failures never break the conversation.
    async fn say(&mut self, text: &str) {
        let language = detect_language(text);
        if let Err(e) = self.speech.speak(text, language).await {
            warn!("Speech output failed: {}", e);
        }
    }

    /// One full cycle: wait for the wake phrase, then run the session.
    pub async fn run_once(&mut self) -> VoiceResult<SessionOutcome> {
        self.wait_for_wake().await?;
        let outcome = self.run_session().await;
        self.state = SessionState::IdleWakeWait;
        let outcome = outcome?;
        match &outcome {
            SessionOutcome::Completed { formation, .. } => {
                info!("✅ Session done: {} (id {})", formation, formation.id())
            }
            SessionOutcome::TimedOut => info!("⏱️ Session timed out without a choice"),
            SessionOutcome::Abandoned => info!("👋 Visitor left, back to idle"),
        }
        Ok(outcome)
    }

    /// Listen in idle mode until the wake gate fires. Only device errors escape.
    pub async fn wait_for_wake(&mut self) -> VoiceResult<()> {
        self.state = SessionState::IdleWakeWait;
        info!("💤 Waiting for the wake phrase...");
        loop {
            let text = match self.listener.next_utterance(ListenMode::Wake).await {
                Ok(transcript) => transcript.text,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Idle transcription failed: {}", e);
                    String::new()
                }
            };
            if self.wake.observe(&text) {
                info!("✅ Wake phrase detected: {}", text);
                return Ok(());
            }
            if !text.is_empty() {
                debug!("Ignoring idle speech: {}", text);
            }
        }
    }

    /// Run one conversation from the greeting to its outcome.
    pub async fn run_session(&mut self) -> VoiceResult<SessionOutcome> {
        self.wake.reset();
        let mut session = ConversationSession::new(self.config.max_turns, self.config.history_window);
        info!("🚀 Session started (max {} turns)", session.max_turns());

        self.enter(&mut session, SessionState::Greeting);
        session.push_assistant(prompts::GREETING);
        self.say(prompts::GREETING).await;
        self.enter(&mut session, SessionState::AwaitingUser);

        loop {
            let text = match self.listener.next_utterance(ListenMode::Conversation).await {
                Ok(transcript) => transcript.text,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Transcription failed: {}", e);
                    String::new()
                }
            };

            if text.trim().chars().count() < MIN_UTTERANCE_CHARS {
                let silences = session.record_silence();
                if silences >= self.config.max_consecutive_silences {
                    self.enter(&mut session, SessionState::TimeoutAbort);
                    return Ok(SessionOutcome::Abandoned);
                }
                debug!("Nothing usable heard ({}/{})", silences, self.config.max_consecutive_silences);
                self.say(prompts::NOT_HEARD).await;
                continue;
            }
            session.clear_silences();

            if let Some(outcome) = self.handle_utterance(&mut session, &text).await? {
                return Ok(outcome);
            }
        }
    }

    /// Process one non-empty user utterance inside `session`.
    ///
    /// Returns `Some` when the session ends (confirmation or turn budget), `None` to
    /// keep listening.
    pub async fn handle_utterance(
        &mut self,
        session: &mut ConversationSession,
        text: &str,
    ) -> VoiceResult<Option<SessionOutcome>> {
        debug!("👤 Visitor: {}", text);

        if session.waiting_confirmation() && self.config.is_confirmation(text) {
            if let Some(formation) = session.formation_proposed() {
                session.push_user(text);
                return Ok(Some(self.close(session, formation).await));
            }
        }

        session.push_user(text);

        let reply = if self.config.is_handoff(text) {
            info!("↪️ Off-topic request, redirecting");
            self.enter(session, SessionState::Handoff);
            StructuredResponse::handoff(prompts::HANDOFF_REDIRECT)
        } else {
            let request = CompletionRequest::new(
                prompts::SYSTEM_PROMPT,
                session.history().to_vec(),
                self.temperature,
            );
            match request_structured(&self.policy, &request).await {
                Ok(response) => {
                    if response.done && session.waiting_confirmation() {
                        if let Some(formation) = session.formation_proposed() {
                            return Ok(Some(self.close(session, formation).await));
                        }
                    }
                    self.follow_up(session, response)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Dialogue turn failed: {}", e);
                    StructuredResponse::message(prompts::REFORMULATE)
                }
            }
        };

        session.push_assistant(reply.say.clone());
        let turns = session.consume_turn();
        debug!("Turn {}/{}", turns, session.max_turns());
        self.say(&reply.say).await;

        if session.is_exhausted() {
            self.enter(session, SessionState::TimeoutAbort);
            return Ok(Some(SessionOutcome::TimedOut));
        }
        self.enter(session, SessionState::AwaitingUser);
        Ok(None)
    }

    /// Turn a validated model answer into what the kiosk says next.
    fn follow_up(&mut self, session: &mut ConversationSession, response: StructuredResponse) -> StructuredResponse {
        let mut text = session.transcript_text();
        text.push('\n');
        text.push_str(&response.say);
        let formation = detect_formation(&text).or(response.proposed.map(|p| p.label));

        match formation {
            Some(formation) if !session.waiting_confirmation() => {
                info!("💡 Proposing {}", formation);
                session.propose(formation);
                StructuredResponse::proposal(formation, prompts::proposal(formation))
            }
            _ => response,
        }
    }

    async fn close(&mut self, session: &mut ConversationSession, formation: Formation) -> SessionOutcome {
        let response = StructuredResponse::closing(formation, prompts::closing(formation));
        session.push_assistant(response.say.clone());
        self.say(&response.say).await;
        self.enter(session, SessionState::Done);
        SessionOutcome::Completed { formation, response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_lexicon() {
        let config = SessionConfig::default();
        assert!(config.is_confirmation("Oui !"));
        assert!(config.is_confirmation("d'accord, ça me va"));
        assert!(config.is_confirmation("Parfait"));
        assert!(!config.is_confirmation("non, pas d'accord"));
        assert!(!config.is_confirmation("je ne sais pas"));
        assert!(!config.is_confirmation("bonjour"));
    }

    #[test]
    fn go_and_casual_acceptances_confirm() {
        let config = SessionConfig::default();
        assert!(config.is_confirmation("go"));
        assert!(config.is_confirmation("oui, pourquoi pas"));
        assert!(config.is_confirmation("oui pas de souci"));
        assert!(config.is_confirmation("ok ça me plaît pas mal"));
    }

    #[test]
    fn negations_cancel_a_confirmation() {
        let config = SessionConfig::default();
        assert!(!config.is_confirmation("Non merci, c'est bon"));
        assert!(!config.is_confirmation("oui mais pas ça"));
        assert!(!config.is_confirmation("ok mais plutôt pas, je veux autre chose"));
        assert!(!config.is_confirmation("ça ne me convient pas"));
    }

    #[test]
    fn handoff_lexicon() {
        let config = SessionConfig::default();
        assert!(config.is_handoff("c'est combien le prix"));
        assert!(config.is_handoff("Quelle est la météo demain ?"));
        assert!(config.is_handoff("raconte moi une blague"));
        assert!(config.is_handoff("quelle est la date des portes ouvertes"));
        assert!(config.is_handoff("comment se passe l'inscription"));
        assert!(config.is_handoff("les conditions d'admission"));
        assert!(config.is_handoff("combien d'années ça dure"));
        assert!(config.is_handoff("quels sont les tarifs"));
        assert!(!config.is_handoff("je veux devenir ingénieur"));
        assert!(!config.is_handoff("je suis en terminale"));
    }

    #[test]
    fn outcome_ids() {
        let done = SessionOutcome::Completed {
            formation: Formation::ProgrammeGrandeEcole,
            response: StructuredResponse::closing(Formation::ProgrammeGrandeEcole, "ok"),
        };
        assert_eq!(done.formation_id(), Some(1));
        assert_eq!(SessionOutcome::TimedOut.formation_id(), None);
        assert_eq!(SessionOutcome::Abandoned.formation_id(), None);
    }
}
