use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    provider::{
        ChatCompletion, ChatCompletionRequest, CompletionProvider, ProviderError,
        types::ApiErrorEnvelope,
    },
};

/// Chat-completions client for the OpenAI HTTP API.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    organization: Option<String>,
    project: Option<String>,
}

impl OpenAiClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            organization: config.openai_organization.clone(),
            project: config.openai_project.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "calling chat completions"
        );

        let mut builder = self.http.post(self.completions_url()).json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = self.organization.as_deref() {
            builder = builder.header("OpenAI-Organization", org);
        }
        if let Some(project) = self.project.as_deref() {
            builder = builder.header("OpenAI-Project", project);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            let err = classify_failure(status, &body);
            warn!(%status, "provider rejected completion request");
            return Err(err);
        }

        let completion: ChatCompletion = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("invalid provider response: {e}")))?;
        if let Some(usage) = completion.usage {
            debug!(
                model = %completion.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion received"
            );
        }
        Ok(completion)
    }
}

/// Maps a non-success provider response onto a [`ProviderError`].
fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let message = error_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED => ProviderError::Authentication { message },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { message },
        _ => ProviderError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
        if let Some(message) = envelope.error.message.filter(|m| !m.is_empty()) {
            return message;
        }
        if let Some(kind) = envelope.error.kind {
            return match envelope.error.code {
                Some(code) => format!("{kind} ({code})"),
                None => kind,
            };
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}
