use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    config::AppConfig,
    error::ServiceError,
    gateway::{PromptRequest, PromptResponse, handle_prompt},
    provider::CompletionProvider,
};

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn CompletionProvider>,
}

pub fn build_router(config: Arc<AppConfig>, provider: Arc<dyn CompletionProvider>) -> Router {
    let state = AppState { provider };

    let router = Router::new()
        .route("/", get(read_root))
        .route("/openai", post(call_openai))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors_layer(&config.cors_allow_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

async fn read_root() -> Json<Value> {
    Json(json!({ "Hello": "World" }))
}

// The body is parsed as JSON whatever its Content-Type, and every body error is a 422.
async fn call_openai(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PromptResponse>, ServiceError> {
    let request: PromptRequest = serde_json::from_slice(&body)?;
    let response = handle_prompt(state.provider.as_ref(), request).await?;
    Ok(Json(response))
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}
