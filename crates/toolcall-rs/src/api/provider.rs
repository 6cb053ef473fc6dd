//! The model-completion port.
//!
//! The engine treats "generate a completion given messages and tools" as a
//! single capability. Provider selection, failover, and wire formats live
//! behind [`ModelProvider`]; the loop only needs to know which model
//! answered so it can keep using it.

use crate::error::ProviderError;
use crate::{ConversationMessage, ToolCall, ToolDefinition};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Boxed future returned by [`ModelProvider::complete`].
pub type CompletionFuture<'a> = BoxFuture<'a, Result<ModelResponse, ProviderError>>;

/// Everything the model sees for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ConversationMessage>,
    /// Active tools with sanitized names and normalized parameters.
    pub tools: Vec<ToolDefinition>,
    pub system_instruction: String,
    /// Preferred model. `None` lets the provider choose.
    pub model: Option<String>,
}

/// A single model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub function_calls: Vec<ToolCall>,
    /// The model that actually answered.
    #[serde(default)]
    pub used_model: Option<String>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self {
            function_calls: calls,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.used_model = Some(model.into());
        self
    }
}

/// A model-completion capability.
///
/// Uses a boxed future so the trait stays dyn-compatible.
pub trait ModelProvider: Send + Sync {
    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_>;
}

/// A provider that replays a fixed script of responses.
///
/// Once the script is exhausted the last entry repeats, which makes
/// "the model never stops calling tools" scenarios easy to express. Every
/// request is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    last: Mutex<Option<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a script of successful responses.
    pub fn from_responses(responses: Vec<ModelResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_response(&self) -> Result<ModelResponse, ProviderError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match script.pop_front() {
            Some(next) => {
                *last = Some(next.clone());
                next
            }
            None => last
                .clone()
                .unwrap_or_else(|| Ok(ModelResponse::text(""))),
        }
    }
}

impl ModelProvider for ScriptedProvider {
    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let response = self.next_response();
        Box::pin(async move { response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ConversationMessage::user("hi")],
            tools: vec![],
            system_instruction: String::new(),
            model: None,
        }
    }

    #[tokio::test]
    async fn scripted_provider_replays_then_repeats_last() {
        let provider = ScriptedProvider::from_responses(vec![
            ModelResponse::text("first"),
            ModelResponse::text("second"),
        ]);
        assert_eq!(provider.complete(request()).await.unwrap().text, "first");
        assert_eq!(provider.complete(request()).await.unwrap().text, "second");
        assert_eq!(provider.complete(request()).await.unwrap().text, "second");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn scripted_provider_replays_errors() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::RateLimited("429".into()))]);
        let err = provider.complete(request()).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[test]
    fn model_response_deserializes_with_defaults() {
        let resp: ModelResponse = serde_json::from_str(r#"{"text": "done"}"#).unwrap();
        assert_eq!(resp.text, "done");
        assert!(resp.function_calls.is_empty());
        assert!(resp.used_model.is_none());
    }
}
