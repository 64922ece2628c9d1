//! Wake gate: decides whether an idle-mode transcript should open a session.
//!
//! Matching is textual (the transcript already went through STT). Optional debouncing
//! requires several consecutive positive transcripts before activating, which keeps a
//! noisy hall from waking the kiosk on a single misheard word.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Greeting + name variants the transcriber produces for "Bonjour Tiago".
const MISHEARD_WAKE_PHRASES: &[&str] = &[
    "bonjour thiago",
    "salut thiago",
    "hey thiago",
    "bonjour diago",
    "salut diago",
    "bonjour tiego",
    "bonjour tchiago",
    "bonjour santiago",
];

/// Wake gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Token that wakes the kiosk anywhere in a transcript (default: "tiago")
    pub token: String,
    /// Extra phrases accepted as a wake trigger
    pub phrases: Vec<String>,
    /// Consecutive positive transcripts required (1 = immediate)
    pub debounce_hits: u32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            token: "tiago".to_string(),
            phrases: MISHEARD_WAKE_PHRASES.iter().map(|p| p.to_string()).collect(),
            debounce_hits: 1,
        }
    }
}

/// Wake phrase classifier with a consecutive-hit debounce.
#[derive(Debug, Clone)]
pub struct WakeGate {
    token: String,
    phrases: Vec<String>,
    debounce_hits: u32,
    hits: u32,
}

impl WakeGate {
    pub fn new(config: &WakeConfig) -> Self {
        Self {
            token: config.token.trim().to_lowercase(),
            phrases: config.phrases.iter().map(|p| p.trim().to_lowercase()).collect(),
            debounce_hits: config.debounce_hits.max(1),
            hits: 0,
        }
    }

    /// Gate that requires `hits` consecutive detections.
    pub fn debounced(mut self, hits: u32) -> Self {
        self.debounce_hits = hits.max(1);
        self.hits = 0;
        self
    }

    /// Stateless check: does this transcript contain the wake phrase?
    pub fn is_wake(&self, text: &str) -> bool {
        let t = text.trim().to_lowercase();
        if t.is_empty() {
            return false;
        }
        t.contains(&self.token) || self.phrases.iter().any(|p| t.contains(p.as_str()))
    }

    /// Feed one idle-mode transcript. Returns true once the debounce count is reached.
    pub fn observe(&mut self, text: &str) -> bool {
        if !self.is_wake(text) {
            if self.hits > 0 {
                debug!("Wake streak reset after {} hit(s)", self.hits);
            }
            self.hits = 0;
            return false;
        }
        self.hits += 1;
        debug!("Wake hit {}/{}", self.hits, self.debounce_hits);
        if self.hits >= self.debounce_hits {
            self.hits = 0;
            return true;
        }
        false
    }

    /// Consecutive positives seen so far.
    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn reset(&mut self) {
        self.hits = 0;
    }
}

impl Default for WakeGate {
    fn default() -> Self {
        Self::new(&WakeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_never_wake() {
        let gate = WakeGate::default();
        assert!(!gate.is_wake(""));
        assert!(!gate.is_wake("   \t\n"));
    }

    #[test]
    fn greeting_with_name_wakes() {
        let gate = WakeGate::default();
        assert!(gate.is_wake("bonjour tiago"));
        assert!(gate.is_wake("  BONJOUR Tiago !  "));
        assert!(gate.is_wake("tiago"));
        assert!(gate.is_wake("bonjour je m'appelle tiago"));
    }

    #[test]
    fn misheard_variants_wake() {
        let gate = WakeGate::default();
        assert!(gate.is_wake("Bonjour Thiago"));
        assert!(gate.is_wake("salut diago, ça va ?"));
    }

    #[test]
    fn unrelated_speech_does_not_wake() {
        let gate = WakeGate::default();
        assert!(!gate.is_wake("bonjour"));
        assert!(!gate.is_wake("on va manger à midi"));
    }

    #[test]
    fn immediate_gate_fires_on_first_hit() {
        let mut gate = WakeGate::default();
        assert!(gate.observe("bonjour tiago"));
        assert_eq!(gate.hits(), 0);
    }

    #[test]
    fn debounce_requires_exactly_n_consecutive_hits() {
        let mut gate = WakeGate::default().debounced(3);
        assert!(!gate.observe("bonjour tiago"));
        assert!(!gate.observe("tiago"));
        assert!(gate.observe("hey tiago"));
    }

    #[test]
    fn negative_resets_the_streak() {
        let mut gate = WakeGate::default().debounced(2);
        assert!(!gate.observe("bonjour tiago"));
        assert_eq!(gate.hits(), 1);
        assert!(!gate.observe("rien à voir"));
        assert_eq!(gate.hits(), 0);
        assert!(!gate.observe("bonjour tiago"));
        assert!(gate.observe("bonjour tiago"));
    }

    #[test]
    fn empty_detection_resets_the_streak() {
        let mut gate = WakeGate::default().debounced(2);
        assert!(!gate.observe("tiago"));
        assert!(!gate.observe(""));
        assert_eq!(gate.hits(), 0);
    }

    #[test]
    fn custom_token_from_config() {
        let config = WakeConfig {
            token: "Robo".to_string(),
            phrases: vec![],
            debounce_hits: 1,
        };
        let gate = WakeGate::new(&config);
        assert!(gate.is_wake("salut robo"));
        assert!(!gate.is_wake("bonjour tiago"));
    }
}
