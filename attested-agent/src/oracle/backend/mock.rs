//! Mock LLM backend for testing and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::traits::*;

/// Mock backend.
///
/// Replies come from a script queue first, then from the default response.
/// Every request is recorded for assertions.
pub struct MockBackend {
    model_id: String,
    available: AtomicBool,
    response_content: String,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicU32,
}

impl MockBackend {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            available: AtomicBool::new(true),
            response_content: "Mock response".to_string(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Set the response used once the script is exhausted.
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.response_content = content.into();
        self
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Queue a reply for the next call.
    pub fn push_response(&self, content: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(content.into()));
        }
    }

    /// Queue an error for the next call.
    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("Mock backend disabled".to_string()));
        }

        // Estimate token counts
        let prompt_tokens: u32 = request
            .messages
            .iter()
            .map(|m| m.content.len() as u32 / 4)
            .sum();

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let content = match scripted {
            Some(reply) => reply?,
            None => self.response_content.clone(),
        };

        let completion_tokens = content.len() as u32 / 4;
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend() {
        let backend = MockBackend::new("test-model").with_response("Hello, world!");

        assert!(backend.is_available().await);
        assert_eq!(backend.call_count(), 0);

        let response = backend
            .complete(CompletionRequest::user("Hi"))
            .await
            .unwrap();

        assert_eq!(response.content, "Hello, world!");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.requests()[0].last_user_message(), Some("Hi"));
    }

    #[tokio::test]
    async fn test_script_then_default() {
        let backend = MockBackend::new("test-model").with_response("default");
        backend.push_response("first");
        backend.push_error(LlmError::Timeout(5));

        let first = backend.complete(CompletionRequest::user("a")).await.unwrap();
        assert_eq!(first.content, "first");
        assert!(backend.complete(CompletionRequest::user("b")).await.is_err());
        let third = backend.complete(CompletionRequest::user("c")).await.unwrap();
        assert_eq!(third.content, "default");
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let backend = MockBackend::new("test-model").with_available(false);

        assert!(!backend.is_available().await);
        assert!(backend.complete(CompletionRequest::user("Hi")).await.is_err());
    }
}
