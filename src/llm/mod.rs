// Generative decision backends
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::OpenAiClient;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rate limited by decision backend")]
    RateLimited,

    #[error("connection to decision backend failed: {0}")]
    ConnectionFailed(String),

    #[error("decision backend error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Text-in, text-out decision source. The response is expected to hold a JSON object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionBackend: Send + Sync {
    /// False when the backend has no credentials and cannot be called
    fn is_configured(&self) -> bool;

    async fn generate_decision(&self, prompt: &str) -> Result<String, BackendError>;
}
