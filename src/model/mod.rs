//! Model invocation contract.
//!
//! A [`Model`] accepts an [`LlmRequest`] and returns a lazy stream of
//! [`ResponseFragment`]s. Vendor wire formats and retry policy live in the
//! implementations; the engine only sees fragments.

mod registry;
mod request;

pub use registry::ModelRegistry;
pub use request::{GenerateConfig, LlmRequest, ResponseFragment, ThinkingConfig};

use futures::stream::BoxStream;

pub type ModelStream = BoxStream<'static, Result<ResponseFragment, ModelError>>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model '{model}' unavailable: {message}")]
    Unavailable { model: String, message: String },

    #[error("Model not registered: {0}")]
    NotRegistered(String),

    #[error("No model configured for agent '{0}'")]
    NoModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ModelError {
    pub fn unavailable(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            model: model.into(),
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: LlmRequest) -> Result<ModelStream, ModelError>;
}
