pub mod config;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod server;

pub use config::AppConfig;
pub use error::ServiceError;
pub use gateway::{COMPLETION_MODEL, PromptRequest, PromptResponse, handle_prompt};
pub use provider::{CompletionProvider, OpenAiClient, ProviderError};
pub use server::build_router;
