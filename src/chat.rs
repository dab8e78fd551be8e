use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ChatMessage;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1000;

/// Message list in, generated text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl CompletionClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ChatModel for CompletionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::CompletionFailure(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::CompletionFailure(format!(
                "{} - {}",
                status, error_text
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::CompletionFailure(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::CompletionFailure("response contained no choices".to_string()))
    }
}

/// Produces the assistant reply for a conversation, grounded in retrieved
/// document context when there is any.
pub struct ChatResponder {
    model: Arc<dyn ChatModel>,
}

impl ChatResponder {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Generate a reply. `history` is the caller-truncated recent
    /// conversation (last 10 messages); `context` is the retrieved document
    /// context, possibly empty.
    pub async fn respond(&self, history: Vec<ChatMessage>, context: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::new("system", build_instruction(context)));
        messages.extend(history);

        self.model.complete(messages).await.map_err(|e| match e {
            Error::CompletionFailure(_) => e,
            other => Error::CompletionFailure(other.to_string()),
        })
    }
}

/// The leading system instruction. The context block is embedded verbatim
/// when present; when there is none the instruction carries no context
/// framing at all.
fn build_instruction(context: &str) -> String {
    if context.is_empty() {
        return "You are a helpful assistant for a document chat application. \
                Answer the user's questions from your general knowledge."
            .to_string();
    }

    format!(
        "You are a helpful assistant for a document chat application. \
         Prefer the document context below when answering; if the context \
         is not relevant to the question, fall back to your general \
         knowledge.\n\nContext:\n{}",
        context
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Records the messages it was handed and replies with a fixed string.
    struct RecordingModel {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl RecordingModel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
            self.seen.lock().await.push(messages);
            Ok("generated reply".to_string())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<String> {
            Err(Error::upstream("chat", "boom"))
        }
    }

    #[tokio::test]
    async fn instruction_embeds_context_verbatim() {
        let model = RecordingModel::new();
        let responder = ChatResponder::new(model.clone());
        let context = "[notes.txt]: the answer is 42";

        let reply = responder
            .respond(vec![ChatMessage::new("user", "what is the answer?")], context)
            .await
            .unwrap();
        assert_eq!(reply, "generated reply");

        let seen = model.seen.lock().await;
        let messages = &seen[0];
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains(context));
        assert_eq!(messages[1].role, "user");
    }

    #[tokio::test]
    async fn empty_context_omits_context_framing() {
        let model = RecordingModel::new();
        let responder = ChatResponder::new(model.clone());

        responder
            .respond(vec![ChatMessage::new("user", "hello")], "")
            .await
            .unwrap();

        let seen = model.seen.lock().await;
        let system = &seen[0][0];
        assert_eq!(system.role, "system");
        assert!(!system.content.contains("Context:"));
    }

    #[tokio::test]
    async fn history_order_is_preserved_after_the_instruction() {
        let model = RecordingModel::new();
        let responder = ChatResponder::new(model.clone());
        let history = vec![
            ChatMessage::new("user", "first"),
            ChatMessage::new("assistant", "second"),
            ChatMessage::new("user", "third"),
        ];

        responder.respond(history, "").await.unwrap();

        let seen = model.seen.lock().await;
        let contents: Vec<&str> = seen[0].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1..].to_vec(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn model_errors_surface_as_completion_failure() {
        let responder = ChatResponder::new(Arc::new(FailingModel));
        let err = responder
            .respond(vec![ChatMessage::new("user", "hi")], "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompletionFailure(_)));
    }
}
