//! Per-visitor conversation state, created on wake and dropped on DONE or timeout.

use crate::contract::Formation;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of the history. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Where the kiosk is in its wake/conversation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    IdleWakeWait,
    Greeting,
    AwaitingUser,
    Handoff,
    Done,
    TimeoutAbort,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    history: Vec<ConversationTurn>,
    turn_count: u32,
    max_turns: u32,
    history_window: usize,
    state: SessionState,
    waiting_confirmation: bool,
    formation_proposed: Option<Formation>,
    consecutive_silences: u32,
}

impl ConversationSession {
    pub fn new(max_turns: u32, history_window: usize) -> Self {
        Self {
            history: Vec::new(),
            turn_count: 0,
            max_turns,
            history_window,
            state: SessionState::Greeting,
            waiting_confirmation: false,
            formation_proposed: None,
            consecutive_silences: 0,
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub fn waiting_confirmation(&self) -> bool {
        self.waiting_confirmation
    }

    pub fn formation_proposed(&self) -> Option<Formation> {
        self.formation_proposed
    }

    /// Append a user turn, then keep the first turn plus the latest `history_window`.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(ConversationTurn::user(content));
        if self.history.len() > 1 + self.history_window {
            let excess = self.history.len() - 1 - self.history_window;
            self.history.drain(1..1 + excess);
            debug!("History truncated by {} turn(s)", excess);
        }
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(ConversationTurn::assistant(content));
    }

    /// Count one dialogue turn. Returns the new count.
    pub fn consume_turn(&mut self) -> u32 {
        self.turn_count = self.turn_count.saturating_add(1).min(self.max_turns);
        self.turn_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.turn_count >= self.max_turns
    }

    /// A formation was offered; the next affirmative answer closes the session.
    pub fn propose(&mut self, formation: Formation) {
        self.waiting_confirmation = true;
        self.formation_proposed = Some(formation);
    }

    /// Empty capture in a row. Returns how many so far.
    pub fn record_silence(&mut self) -> u32 {
        self.consecutive_silences += 1;
        self.consecutive_silences
    }

    pub fn clear_silences(&mut self) {
        self.consecutive_silences = 0;
    }

    /// All turn contents joined, for keyword classification.
    pub fn transcript_text(&self) -> String {
        self.history
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_in_greeting() {
        let session = ConversationSession::new(10, 12);
        assert_eq!(session.state(), SessionState::Greeting);
        assert_eq!(session.turn_count(), 0);
        assert!(!session.waiting_confirmation());
        assert!(session.history().is_empty());
    }

    #[test]
    fn window_keeps_first_turn_and_latest() {
        let mut session = ConversationSession::new(10, 4);
        session.push_assistant("greeting");
        for i in 0..6 {
            session.push_user(format!("u{i}"));
        }
        let contents: Vec<&str> = session.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["greeting", "u2", "u3", "u4", "u5"]);
    }

    #[test]
    fn turn_count_is_bounded() {
        let mut session = ConversationSession::new(2, 12);
        assert_eq!(session.consume_turn(), 1);
        assert!(!session.is_exhausted());
        assert_eq!(session.consume_turn(), 2);
        assert_eq!(session.consume_turn(), 2);
        assert!(session.is_exhausted());
    }

    #[test]
    fn proposal_sets_confirmation_state() {
        let mut session = ConversationSession::new(10, 12);
        session.propose(Formation::ProgrammeExecutive);
        assert!(session.waiting_confirmation());
        assert_eq!(session.formation_proposed(), Some(Formation::ProgrammeExecutive));
    }

    #[test]
    fn silences_count_until_cleared() {
        let mut session = ConversationSession::new(10, 12);
        assert_eq!(session.record_silence(), 1);
        assert_eq!(session.record_silence(), 2);
        session.clear_silences();
        assert_eq!(session.record_silence(), 1);
    }

    #[test]
    fn turns_serialize_with_lowercase_roles() {
        let v = serde_json::to_value(ConversationTurn::user("oui")).unwrap();
        assert_eq!(v, serde_json::json!({"role": "user", "content": "oui"}));
    }
}
