mod openai;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::OpenAiClient;
pub use types::{
    AssistantMessage, ChatCompletion, ChatCompletionRequest, ChatMessage, Choice, Usage,
};

/// Failure reported by a completion provider.
///
/// The first three variants originate at the provider; `Transport` and `Decode`
/// are local failures talking to it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{message}")]
    Authentication { message: String },
    #[error("{message}")]
    RateLimited { message: String },
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, ProviderError::Authentication { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Any error the provider itself reported, credential and quota errors included.
    pub fn is_provider_originated(&self) -> bool {
        matches!(
            self,
            ProviderError::Authentication { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Api { .. }
        )
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletion, ProviderError>;
}
