use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::retry::{RetryPolicy, StatusError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A chat model: given the full message history, returns the next reply.
///
/// Implementations own their transport retries; callers treat an `Err` as
/// the model being unreachable.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(&self, messages: &[Message]) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Turn history of one multi-turn exchange with a model.
///
/// The history is an ordinary value owned by the caller, so each extractor,
/// aligner, or query run starts from its own context.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append `prompt` as a user turn, ask the model, and record its reply.
    pub async fn send(&mut self, llm: &dyn LanguageModel, prompt: &str) -> Result<String> {
        if self.messages.is_empty() {
            self.messages.push(Message::system(SYSTEM_PROMPT));
        }
        self.messages.push(Message::user(prompt));

        match llm.chat(&self.messages).await {
            Ok(reply) => {
                self.messages.push(Message::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                // Keep the history consistent for the next attempt
                self.messages.pop();
                Err(e)
            }
        }
    }

    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ask `prompt` in a fresh context.
pub async fn single_turn(llm: &dyn LanguageModel, prompt: &str) -> Result<String> {
    Conversation::new().send(llm, prompt).await
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            temperature: 0.1,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn chat_once(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            return Err(StatusError::new("Ollama chat", response.status()).into());
        }

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.message.content)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        self.retry
            .retry("ollama_chat", || self.chat_once(messages))
            .await
    }
}

/// Replays canned replies in order; used for offline runs and tests.
///
/// Every prompt it receives is recorded so callers can assert on what was
/// asked. Once the script runs out it answers with an empty string.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far (last user turn of each call).
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        if let (Ok(mut prompts), Some(last)) = (self.prompts.lock(), messages.last()) {
            prompts.push(last.content.clone());
        }
        let reply = self
            .replies
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted model poisoned"))?
            .pop_front()
            .unwrap_or_default();
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conversation_keeps_history() {
        let llm = ScriptedModel::new(["first", "second"]);
        let mut conversation = Conversation::new();

        assert_eq!(conversation.send(&llm, "q1").await.unwrap(), "first");
        assert_eq!(conversation.send(&llm, "q2").await.unwrap(), "second");

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );

        conversation.reset();
        assert!(conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn test_single_turn_uses_fresh_context() {
        let llm = ScriptedModel::new(["a", "b"]);
        single_turn(&llm, "one").await.unwrap();
        single_turn(&llm, "two").await.unwrap();

        assert_eq!(llm.prompts(), vec!["one", "two"]);
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
