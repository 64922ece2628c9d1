//! Validate-and-repair: one corrective round trip when the model breaks the contract.

use crate::contract::{decode, StructuredResponse};
use crate::dialogue::{CompletionRequest, DialoguePolicy};
use crate::error::{VoiceError, VoiceResult};
use crate::prompts::REPAIR_INSTRUCTION;
use crate::session::ConversationTurn;
use tracing::{info, warn};

/// Temperature used for the corrective call.
pub const REPAIR_TEMPERATURE: f32 = 0.0;

/// Ask the policy for a structured answer, repairing at most once.
///
/// The repair request replays the original messages, the rejected output as an
/// assistant turn and a plain-JSON instruction. A second rejection yields
/// [`VoiceError::RepairFailure`] carrying both contract errors. Transport failures
/// of either call are returned unchanged.
pub async fn request_structured(
    policy: &dyn DialoguePolicy,
    request: &CompletionRequest,
) -> VoiceResult<StructuredResponse> {
    let raw = policy.complete(request).await?;
    let initial = match decode(&raw) {
        Ok(response) => return Ok(response),
        Err(e) => e,
    };

    info!("🔧 Model output rejected ({}), requesting one repair", initial);
    let mut messages = request.messages.clone();
    messages.push(ConversationTurn::assistant(raw));
    messages.push(ConversationTurn::user(REPAIR_INSTRUCTION));
    let repair = CompletionRequest::new(request.system.clone(), messages, REPAIR_TEMPERATURE);

    let repaired_raw = policy.complete(&repair).await?;
    match decode(&repaired_raw) {
        Ok(response) => {
            info!("✅ Repair produced a valid response");
            Ok(response)
        }
        Err(repaired) => {
            warn!(raw = %repaired_raw, "Repair failed: {}", repaired);
            Err(VoiceError::RepairFailure { initial, repaired })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const VALID: &str = r#"{"say":"Bonjour","done":false,"ask_confirmation":false,"proposed":null,"dataset":null,"handoff":false}"#;

    struct Scripted {
        replies: Mutex<VecDeque<VoiceResult<String>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<VoiceResult<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<CompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DialoguePolicy for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> VoiceResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(VoiceError::DialogueUnavailable("script exhausted".into())))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("sys", vec![ConversationTurn::user("Je suis en terminale")], 0.2)
    }

    #[tokio::test]
    async fn valid_first_answer_needs_no_repair() {
        let policy = Scripted::new(vec![Ok(VALID.to_string())]);
        let resp = request_structured(&policy, &request()).await.unwrap();
        assert_eq!(resp.say, "Bonjour");
        assert_eq!(policy.calls().len(), 1);
    }

    #[tokio::test]
    async fn one_repair_recovers_a_prose_answer() {
        let policy = Scripted::new(vec![Ok("Bien sûr, je peux vous aider !".to_string()), Ok(VALID.to_string())]);
        let resp = request_structured(&policy, &request()).await.unwrap();
        assert_eq!(resp.say, "Bonjour");

        let calls = policy.calls();
        assert_eq!(calls.len(), 2);
        let repair = &calls[1];
        assert_eq!(repair.temperature, REPAIR_TEMPERATURE);
        assert_eq!(repair.system, "sys");
        assert_eq!(repair.messages.len(), 3);
        assert_eq!(repair.messages[1], ConversationTurn::assistant("Bien sûr, je peux vous aider !"));
        assert_eq!(repair.messages[2].content, REPAIR_INSTRUCTION);
    }

    #[tokio::test]
    async fn second_failure_carries_both_errors() {
        let policy = Scripted::new(vec![
            Ok("pas de json".to_string()),
            Ok(r#"{"say":"", "done":false}"#.to_string()),
        ]);
        let err = request_structured(&policy, &request()).await.unwrap_err();
        match err {
            VoiceError::RepairFailure { initial, repaired } => {
                assert!(matches!(initial, ContractError::Extraction));
                assert!(matches!(repaired, ContractError::Validation { field: "say", .. }));
            }
            other => panic!("expected RepairFailure, got {other:?}"),
        }
        assert_eq!(policy.calls().len(), 2);
    }

    #[test]
    fn fenced_answer_is_accepted_without_repair() {
        let fenced = format!("```json\n{}\n```", VALID);
        let policy = Scripted::new(vec![Ok(fenced)]);
        let resp = tokio_test::block_on(request_structured(&policy, &request())).unwrap();
        assert_eq!(resp.say, "Bonjour");
        assert_eq!(policy.calls().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let policy = Scripted::new(vec![Err(VoiceError::DialogueUnavailable("timeout".into()))]);
        let err = request_structured(&policy, &request()).await.unwrap_err();
        assert!(matches!(err, VoiceError::DialogueUnavailable(_)));
        assert_eq!(policy.calls().len(), 1);
    }
}
