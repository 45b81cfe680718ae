//! Assistant collaborator.
//!
//! Chat completion and file analysis are provided by an external service.
//! The hub only needs the request/response contract below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Model used when a request names none.
pub const DEFAULT_MODEL: &str = "llama";

/// Assistant errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    /// No assistant backend is configured.
    #[error("assistant unavailable")]
    Unavailable,

    /// The backend rejected or failed the request.
    #[error("assistant failed: {0}")]
    Failed(String),
}

/// A chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// Requesting user.
    pub user_id: String,
    /// Prompt text.
    pub content: String,
    /// Model name.
    pub model: String,
    /// Dataset selected on the connection, passed as context.
    pub dataset: Option<String>,
}

/// A prompt sent to the model as-is: no system prompt, no dataset context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPromptRequest {
    /// Requesting user.
    pub user_id: String,
    /// Prompt text.
    pub content: String,
    /// Concrete model name, already resolved from any provider alias.
    pub model: String,
}

/// A file analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnalysisRequest {
    /// Requesting user.
    pub user_id: String,
    /// File identifier.
    pub file_id: String,
    /// Question about the file.
    pub query: String,
    /// Model name.
    pub model: String,
}

/// Result of a file analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Free-form answer.
    pub analysis: String,
    /// Notable observations.
    pub insights: Vec<String>,
    /// Suggested follow-ups.
    pub suggestions: Vec<String>,
}

/// External completion and analysis service.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Answers a chat prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn complete_chat(&self, request: ChatRequest) -> Result<String, AssistantError>;

    /// Answers a raw prompt with no system prompt around it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or has no raw mode.
    async fn complete_raw(&self, request: RawPromptRequest) -> Result<String, AssistantError>;

    /// Analyzes a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn analyze_file(
        &self,
        request: FileAnalysisRequest,
    ) -> Result<FileAnalysis, AssistantError>;
}

/// Assistant used when no backend is wired; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableAssistant;

#[async_trait]
impl Assistant for UnavailableAssistant {
    async fn complete_chat(&self, _request: ChatRequest) -> Result<String, AssistantError> {
        Err(AssistantError::Unavailable)
    }

    async fn complete_raw(&self, _request: RawPromptRequest) -> Result<String, AssistantError> {
        Err(AssistantError::Unavailable)
    }

    async fn analyze_file(
        &self,
        _request: FileAnalysisRequest,
    ) -> Result<FileAnalysis, AssistantError> {
        Err(AssistantError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_assistant() {
        let assistant = UnavailableAssistant;
        let chat = assistant
            .complete_chat(ChatRequest {
                user_id: "u".to_string(),
                content: "hi".to_string(),
                model: DEFAULT_MODEL.to_string(),
                dataset: None,
            })
            .await;
        assert_eq!(chat, Err(AssistantError::Unavailable));

        let raw = assistant
            .complete_raw(RawPromptRequest {
                user_id: "u".to_string(),
                content: "hi".to_string(),
                model: "gpt-4o-mini".to_string(),
            })
            .await;
        assert_eq!(raw, Err(AssistantError::Unavailable));
    }

    #[test]
    fn test_file_analysis_serialize() {
        let analysis = FileAnalysis {
            analysis: "ok".to_string(),
            insights: vec!["a".to_string()],
            suggestions: Vec::new(),
        };
        let json = serde_json::to_value(&analysis).expect("serialize");
        assert_eq!(json["insights"][0], "a");
    }
}
