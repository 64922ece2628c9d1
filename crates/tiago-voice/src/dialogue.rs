//! Dialogue policy: the external text generator that answers the visitor.
//!
//! The kiosk only depends on [`DialoguePolicy`]; [`OllamaDialogue`] talks to a local
//! Ollama server through `/api/chat`.

use crate::error::{VoiceError, VoiceResult};
use crate::session::ConversationTurn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Dialogue service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Ollama base URL (default: http://127.0.0.1:11434)
    pub base_url: String,
    pub model: String,
    /// Sampling temperature for normal turns (repairs always use 0)
    pub temperature: f32,
    /// Request timeout before the first successful call (model load)
    pub cold_timeout_seconds: u64,
    /// Request timeout once the model answered once
    pub warm_timeout_seconds: u64,
    pub health_timeout_seconds: u64,
    /// How long Ollama keeps the model resident between calls
    pub keep_alive: String,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "tiago-cesi".to_string(),
            temperature: 0.2,
            cold_timeout_seconds: 180,
            warm_timeout_seconds: 60,
            health_timeout_seconds: 5,
            keep_alive: "10m".to_string(),
        }
    }
}

/// One stateless completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ConversationTurn>,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ConversationTurn>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            messages,
            temperature,
        }
    }
}

/// Text generator behind the conversation. Errors are `DialogueUnavailable`.
#[async_trait]
pub trait DialoguePolicy: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> VoiceResult<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    keep_alive: &'a str,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Ollama `/api/chat` client (non-streaming).
pub struct OllamaDialogue {
    config: DialogueConfig,
    client: reqwest::Client,
    warmed: AtomicBool,
}

impl OllamaDialogue {
    pub fn new(config: DialogueConfig) -> Self {
        Self {
            config: DialogueConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client: reqwest::Client::new(),
            warmed: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn timeout(&self) -> Duration {
        let secs = if self.warmed.load(Ordering::Relaxed) {
            self.config.warm_timeout_seconds
        } else {
            self.config.cold_timeout_seconds
        };
        Duration::from_secs(secs)
    }

    /// Health check: `GET /api/tags`.
    pub async fn ping(&self) -> VoiceResult<()> {
        let url = format!("{}/api/tags", self.config.base_url);
        let res = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.health_timeout_seconds))
            .send()
            .await
            .map_err(|e| VoiceError::DialogueUnavailable(format!("{} unreachable: {}", url, e)))?;
        if !res.status().is_success() {
            return Err(VoiceError::DialogueUnavailable(format!(
                "Health check returned {}",
                res.status()
            )));
        }
        info!("✅ Dialogue service reachable at {}", self.config.base_url);
        Ok(())
    }

    /// Load the model ahead of the first visitor with a trivial request.
    pub async fn warm_up(&self) -> VoiceResult<()> {
        info!("🔥 Warming up dialogue model '{}'", self.config.model);
        let request = CompletionRequest::new(
            String::new(),
            vec![ConversationTurn::user(crate::prompts::WARM_UP)],
            self.config.temperature,
        );
        let reply = self.complete(&request).await?;
        debug!("Warm-up reply: {}", reply);
        info!("✅ Dialogue model warm");
        Ok(())
    }
}

#[async_trait]
impl DialoguePolicy for OllamaDialogue {
    async fn complete(&self, request: &CompletionRequest) -> VoiceResult<String> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.extend(request.messages.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            keep_alive: &self.config.keep_alive,
            options: ChatOptions {
                temperature: request.temperature,
            },
        };

        debug!(
            "📤 Dialogue request: {} messages, temperature {}, last: {:?}",
            request.messages.len(),
            request.temperature,
            request.messages.last().map(|m| m.content.as_str())
        );

        let url = format!("{}/api/chat", self.config.base_url);
        let res = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::DialogueUnavailable(format!("Request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(VoiceError::DialogueUnavailable(format!("API error {}: {}", status, text)));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::DialogueUnavailable(format!("Response parse failed: {}", e)))?;

        self.warmed.store(true, Ordering::Relaxed);
        let content = parsed.message.content.trim().to_string();
        debug!("📥 Dialogue reply: {}", content);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn defaults_match_local_ollama() {
        let config = DialogueConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.cold_timeout_seconds, 180);
        assert_eq!(config.warm_timeout_seconds, 60);
        assert_eq!(config.keep_alive, "10m");
    }

    #[test]
    fn timeout_shrinks_once_warm() {
        let dialogue = OllamaDialogue::new(DialogueConfig::default());
        assert_eq!(dialogue.timeout(), Duration::from_secs(180));
        dialogue.warmed.store(true, Ordering::Relaxed);
        assert_eq!(dialogue.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn chat_body_wire_format() {
        let body = ChatRequest {
            model: "m",
            messages: vec![
                ChatMessage { role: "system", content: "sys" },
                ChatMessage { role: Role::User.as_str(), content: "salut" },
            ],
            stream: false,
            keep_alive: "10m",
            options: ChatOptions { temperature: 0.0 },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["stream"], serde_json::json!(false));
        assert_eq!(v["messages"][1]["role"], "user");
        assert_eq!(v["options"]["temperature"], serde_json::json!(0.0));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let dialogue = OllamaDialogue::new(DialogueConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..DialogueConfig::default()
        });
        assert_eq!(dialogue.config.base_url, "http://localhost:11434");
        assert_eq!(dialogue.model(), "tiago-cesi");
    }

    #[tokio::test]
    #[ignore] // Requires a running Ollama server
    async fn test_ping_local_ollama() {
        let dialogue = OllamaDialogue::new(DialogueConfig::default());
        dialogue.ping().await.unwrap();
    }
}
