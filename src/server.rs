use crate::auth;
use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::normalize::split_model_hints;
use crate::translate::gemini::GeminiCall;
use crate::translate::{gemini_types, openai_types};
use crate::translate::{AnthropicAdapter, GeminiAdapter, OpenAiAdapter, Protocol, ProtocolAdapter};

use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Input images ride along inline, so bodies can be far larger than axum's default.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

pub struct AppState {
    pub config: GatewayConfig,
    pub dispatcher: Dispatcher,
    pub client_keys: Vec<String>,
}

impl AppState {
    pub fn new(config: GatewayConfig, client: reqwest::Client) -> Result<Self> {
        let dispatcher = Dispatcher::new(&config, client)?;
        let client_keys = config.client_keys();
        Ok(Self {
            config,
            dispatcher,
            client_keys,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/images/generations", post(handle_images))
        .route("/v1/messages", post(handle_messages))
        .route(
            "/v1beta/models/:model",
            get(handle_gemini_model).post(handle_generate_content),
        )
        .route("/v1beta/models", get(handle_gemini_models))
        .route("/v1/models", get(handle_openai_models))
        .route("/health", get(handle_health))
        .route("/healthz", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GeminiQuery {
    key: Option<String>,
}

async fn handle_images(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(e) = auth::authenticate(Protocol::OpenAi, &headers, None, &state.client_keys) {
        return error_response::<OpenAiAdapter>(&e);
    }
    match read_body(body).and_then(|b| decode(&b)) {
        Ok(req) => run_pipeline::<OpenAiAdapter>(&state, req).await,
        Err(e) => error_response::<OpenAiAdapter>(&e),
    }
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let checked = auth::authenticate(Protocol::Anthropic, &headers, None, &state.client_keys)
        .and_then(|()| {
            auth::check_anthropic_version(&headers, &state.config.auth.anthropic_versions)
        });
    if let Err(e) = checked {
        return error_response::<AnthropicAdapter>(&e);
    }
    match read_body(body).and_then(|b| decode(&b)) {
        Ok(req) => run_pipeline::<AnthropicAdapter>(&state, req).await,
        Err(e) => error_response::<AnthropicAdapter>(&e),
    }
}

async fn handle_generate_content(
    State(state): State<Arc<AppState>>,
    Path(model_method): Path<String>,
    query: std::result::Result<Query<GeminiQuery>, QueryRejection>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            let err = GatewayError::invalid_request(rejection.body_text());
            return error_response::<GeminiAdapter>(&err);
        }
    };
    if let Err(e) = auth::authenticate(
        Protocol::Gemini,
        &headers,
        query.key.as_deref(),
        &state.client_keys,
    ) {
        return error_response::<GeminiAdapter>(&e);
    }

    let call = split_model_method(&model_method).and_then(|model| {
        let body = read_body(body)?;
        Ok(GeminiCall {
            model: model.to_string(),
            body: decode(&body)?,
        })
    });
    match call {
        Ok(call) => run_pipeline::<GeminiAdapter>(&state, call).await,
        Err(e) => error_response::<GeminiAdapter>(&e),
    }
}

/// `gemini-3-pro-image:generateContent` -> `gemini-3-pro-image`
fn split_model_method(segment: &str) -> Result<&str> {
    match segment.split_once(':') {
        Some((model, "generateContent")) if !model.is_empty() => Ok(model),
        Some((_, "streamGenerateContent")) => Err(GatewayError::invalid_request(
            "Streaming is not supported for image generation",
        )),
        Some((_, method)) => Err(GatewayError::invalid_request(format!(
            "Unsupported method '{method}'"
        ))),
        None => Err(GatewayError::invalid_request(
            "Expected a path of the form models/{model}:generateContent",
        )),
    }
}

/// Body extraction failures (oversized or truncated uploads) become protocol-native 400s.
fn read_body(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|rejection| GatewayError::invalid_request(rejection.body_text()))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::invalid_request(format!("Invalid request body: {e}")))
}

/// normalize -> dispatch -> render, in that order, for one request.
async fn run_pipeline<A: ProtocolAdapter>(state: &AppState, request: A::Request) -> Response {
    let outcome = async {
        let (canonical, ctx) = A::parse(request)?;
        tracing::info!(
            protocol = %A::PROTOCOL,
            model = %canonical.model,
            aspect_ratio = ?canonical.aspect_ratio,
            resolution = ?canonical.resolution,
            "Normalized image request"
        );
        let result = state.dispatcher.dispatch(canonical).await?;
        Ok::<_, GatewayError>(A::render(result, ctx))
    }
    .await;

    match outcome {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response::<A>(&e),
    }
}

fn error_response<A: ProtocolAdapter>(err: &GatewayError) -> Response {
    let (status, body) = A::render_error(err);
    if status.is_server_error() {
        tracing::error!(
            protocol = %A::PROTOCOL,
            status = status.as_u16(),
            error = %err,
            "Request failed"
        );
    } else {
        tracing::warn!(
            protocol = %A::PROTOCOL,
            status = status.as_u16(),
            error = %err,
            "Request rejected"
        );
    }
    (status, Json(body)).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Backend models plus configured aliases, sorted.
fn advertised_models(state: &AppState) -> Vec<String> {
    let mut names: Vec<String> = state
        .dispatcher
        .backend_models()
        .iter()
        .chain(state.config.models.keys())
        .cloned()
        .collect();
    names.sort();
    names.dedup();
    names
}

async fn handle_openai_models(
    State(state): State<Arc<AppState>>,
) -> Json<openai_types::ModelsListResponse> {
    let data = advertised_models(&state)
        .into_iter()
        .map(|id| openai_types::ModelEntry {
            id,
            object: "model".to_string(),
            owned_by: "image-gateway".to_string(),
        })
        .collect();
    Json(openai_types::ModelsListResponse {
        object: "list".to_string(),
        data,
    })
}

fn gemini_model_info(id: String) -> gemini_types::ModelInfo {
    gemini_types::ModelInfo {
        name: format!("models/{id}"),
        display_name: id,
        supported_generation_methods: vec!["generateContent".to_string()],
    }
}

async fn handle_gemini_models(
    State(state): State<Arc<AppState>>,
) -> Json<gemini_types::ModelsListResponse> {
    let models = advertised_models(&state)
        .into_iter()
        .map(gemini_model_info)
        .collect();
    Json(gemini_types::ModelsListResponse { models })
}

/// `GET /v1beta/models/{model}`. Suffixed names resolve like they do on generation.
async fn handle_gemini_model(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> Response {
    let hints = split_model_hints(&model);
    match state.dispatcher.resolve_model(&hints.base) {
        Ok(_) => Json(gemini_model_info(model)).into_response(),
        Err(e) => error_response::<GeminiAdapter>(&e),
    }
}
