use axum::http::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    provider::{ChatCompletionRequest, ChatMessage, CompletionProvider, ProviderError},
};

/// Model requested for every completion, regardless of the inbound payload.
pub const COMPLETION_MODEL: &str = "gpt-3.5-turbo";

pub const DEFAULT_MAX_TOKENS: i64 = 150;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens", deserialize_with = "integral")]
    pub max_tokens: i64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_tokens() -> i64 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

/// Accepts JSON integers and floats with no fractional part (`150.0`).
fn integral<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(value) => Ok(value),
        Number::Float(value)
            if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 =>
        {
            Ok(value as i64)
        }
        Number::Float(value) => Err(D::Error::custom(format!(
            "expected an integer, got {value}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResponse {
    pub prompt: String,
    pub response: String,
    pub model: String,
}

struct ErrorRule {
    name: &'static str,
    matches: fn(&ProviderError) -> bool,
    status: StatusCode,
    detail: fn(&ProviderError) -> String,
}

// Evaluated top to bottom; the first matching rule decides the response.
// The last rule matches everything.
static ERROR_RULES: [ErrorRule; 4] = [
    ErrorRule {
        name: "authentication",
        matches: ProviderError::is_authentication,
        status: StatusCode::UNAUTHORIZED,
        detail: invalid_key_detail,
    },
    ErrorRule {
        name: "rate_limit",
        matches: ProviderError::is_rate_limited,
        status: StatusCode::TOO_MANY_REQUESTS,
        detail: rate_limit_detail,
    },
    ErrorRule {
        name: "provider",
        matches: ProviderError::is_provider_originated,
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: provider_detail,
    },
    ErrorRule {
        name: "unexpected",
        matches: always,
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: unexpected_detail,
    },
];

fn invalid_key_detail(_: &ProviderError) -> String {
    "Invalid OpenAI API key".to_string()
}

fn rate_limit_detail(_: &ProviderError) -> String {
    "OpenAI rate limit exceeded".to_string()
}

fn provider_detail(err: &ProviderError) -> String {
    format!("OpenAI API error: {err}")
}

fn unexpected_detail(err: &ProviderError) -> String {
    format!("Unexpected error: {err}")
}

fn always(_: &ProviderError) -> bool {
    true
}

/// Converts a provider failure into the HTTP error returned to the caller.
pub fn map_provider_error(err: &ProviderError) -> ServiceError {
    let rule = ERROR_RULES
        .iter()
        .find(|rule| (rule.matches)(err))
        .unwrap_or(&ERROR_RULES[ERROR_RULES.len() - 1]);

    warn!(rule = rule.name, status = %rule.status, "completion request failed");

    ServiceError::Upstream {
        status: rule.status,
        detail: (rule.detail)(err),
    }
}

/// Forwards one prompt to the provider and shapes the reply.
///
/// No retries: every provider failure ends the request.
pub async fn handle_prompt(
    provider: &dyn CompletionProvider,
    request: PromptRequest,
) -> Result<PromptResponse, ServiceError> {
    let completion_request = ChatCompletionRequest {
        model: COMPLETION_MODEL.to_string(),
        messages: vec![ChatMessage::user(request.prompt.as_str())],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    };

    let completion = provider
        .complete(completion_request)
        .await
        .map_err(|err| map_provider_error(&err))?;

    let text = completion.first_content().ok_or_else(|| {
        map_provider_error(&ProviderError::Decode(
            "provider response contained no completion text".to_string(),
        ))
    })?;

    debug!(model = %completion.model, "completion mapped to response");

    Ok(PromptResponse {
        response: text.trim().to_string(),
        model: completion.model.clone(),
        prompt: request.prompt,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::provider::{AssistantMessage, ChatCompletion, Choice};

    struct ScriptedProvider {
        outcome: Result<ChatCompletion, ProviderError>,
        seen: Mutex<Vec<ChatCompletionRequest>>,
    }

    impl ScriptedProvider {
        fn replying(content: Option<&str>, model: &str) -> Self {
            Self::with_outcome(Ok(ChatCompletion {
                id: Some("chatcmpl-test".to_string()),
                model: model.to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: AssistantMessage {
                        role: Some("assistant".to_string()),
                        content: content.map(str::to_string),
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            }))
        }

        fn failing(err: ProviderError) -> Self {
            Self::with_outcome(Err(err))
        }

        fn with_outcome(outcome: Result<ChatCompletion, ProviderError>) -> Self {
            Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ChatCompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(
            &self,
            request: ChatCompletionRequest,
        ) -> Result<ChatCompletion, ProviderError> {
            self.seen.lock().unwrap().push(request);
            self.outcome.clone()
        }
    }

    fn request(json: serde_json::Value) -> PromptRequest {
        serde_json::from_value(json).unwrap()
    }

    fn detail_and_status(err: ServiceError) -> (StatusCode, String) {
        (err.status(), err.to_string())
    }

    #[tokio::test]
    async fn trims_completion_and_echoes_prompt() {
        let provider = ScriptedProvider::replying(Some("  X  \n"), "gpt-3.5-turbo-0125");
        let prompt = "  keep   my\twhitespace ";

        let response = handle_prompt(&provider, request(serde_json::json!({ "prompt": prompt })))
            .await
            .unwrap();

        assert_eq!(response.response, "X");
        assert_eq!(response.prompt, prompt);
        assert_eq!(response.model, "gpt-3.5-turbo-0125");
    }

    #[tokio::test]
    async fn forwards_defaults_and_fixed_model() {
        let provider = ScriptedProvider::replying(Some("ok"), "gpt-3.5-turbo");

        handle_prompt(&provider, request(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap();

        let seen = provider.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, COMPLETION_MODEL);
        assert_eq!(seen[0].messages, vec![ChatMessage::user("hi")]);
        assert_eq!(seen[0].max_tokens, 150);
        assert_eq!(seen[0].temperature, 0.7);
    }

    #[tokio::test]
    async fn out_of_range_parameters_pass_through() {
        let provider = ScriptedProvider::replying(Some("ok"), "gpt-3.5-turbo");

        handle_prompt(
            &provider,
            request(serde_json::json!({ "prompt": "hi", "max_tokens": -5, "temperature": 9.5 })),
        )
        .await
        .unwrap();

        let seen = provider.requests();
        assert_eq!(seen[0].max_tokens, -5);
        assert_eq!(seen[0].temperature, 9.5);
    }

    #[tokio::test]
    async fn empty_prompt_is_forwarded_as_is() {
        let provider = ScriptedProvider::replying(Some("ok"), "gpt-3.5-turbo");

        let response = handle_prompt(&provider, request(serde_json::json!({ "prompt": "" })))
            .await
            .unwrap();

        assert_eq!(response.prompt, "");
        let seen = provider.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages, vec![ChatMessage::user("")]);
    }

    #[tokio::test]
    async fn authentication_failure_maps_to_401() {
        let provider = ScriptedProvider::failing(ProviderError::Authentication {
            message: "Incorrect API key provided".to_string(),
        });

        let err = handle_prompt(&provider, request(serde_json::json!({ "prompt": "anything" })))
            .await
            .unwrap_err();

        assert_eq!(
            detail_and_status(err),
            (StatusCode::UNAUTHORIZED, "Invalid OpenAI API key".to_string())
        );
    }

    #[tokio::test]
    async fn rate_limit_maps_to_429() {
        let provider = ScriptedProvider::failing(ProviderError::RateLimited {
            message: "slow down".to_string(),
        });

        let err = handle_prompt(&provider, request(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap_err();

        assert_eq!(
            detail_and_status(err),
            (
                StatusCode::TOO_MANY_REQUESTS,
                "OpenAI rate limit exceeded".to_string()
            )
        );
    }

    #[tokio::test]
    async fn other_provider_error_embeds_message() {
        let provider = ScriptedProvider::failing(ProviderError::Api {
            status: 400,
            message: "boom".to_string(),
        });

        let err = handle_prompt(&provider, request(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap_err();

        assert_eq!(
            detail_and_status(err),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OpenAI API error: boom".to_string()
            )
        );
    }

    #[tokio::test]
    async fn transport_failure_is_unexpected() {
        let provider =
            ScriptedProvider::failing(ProviderError::Transport("connection refused".to_string()));

        let err = handle_prompt(&provider, request(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap_err();

        assert_eq!(
            detail_and_status(err),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unexpected error: connection refused".to_string()
            )
        );
    }

    #[tokio::test]
    async fn missing_content_is_unexpected() {
        let provider = ScriptedProvider::replying(None, "gpt-3.5-turbo");

        let err = handle_prompt(&provider, request(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Unexpected error: "));
    }

    #[test]
    fn credential_rule_wins_over_generic_provider_rule() {
        let err = ProviderError::Authentication {
            message: "bad key".to_string(),
        };
        assert!(err.is_provider_originated());
        assert_eq!(map_provider_error(&err).status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn non_integer_max_tokens_is_a_shape_error() {
        let parsed = serde_json::from_value::<PromptRequest>(
            serde_json::json!({ "prompt": "hi", "max_tokens": "many" }),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn integral_float_max_tokens_is_accepted() {
        let parsed = request(serde_json::json!({ "prompt": "hi", "max_tokens": 150.0 }));
        assert_eq!(parsed.max_tokens, 150);

        let fractional = serde_json::from_value::<PromptRequest>(
            serde_json::json!({ "prompt": "hi", "max_tokens": 1.5 }),
        );
        assert!(fractional.is_err());
    }
}
