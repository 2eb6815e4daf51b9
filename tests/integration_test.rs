use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use image_gateway::normalize::{AspectRatio, ResolutionTier};
use image_gateway::translate::gemini::GeminiCall;
use image_gateway::translate::{AnthropicAdapter, GeminiAdapter, OpenAiAdapter, ProtocolAdapter};
use image_gateway::{build_router, AppState, GatewayConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "sk-79754f1fecab4451aa8bb9f0ba4d5ee9";
const BACKEND_PATH: &str = "/v1beta/models/gemini-3-pro-image:generateContent";

fn config_for(server: &MockServer) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.api_keys = vec![KEY.to_string()];
    config.backend.base_url = server.uri();
    config.backend.api_key = Some("backend-key".to_string());
    config.backend.timeout_secs = 5;
    config
}

fn gateway(config: GatewayConfig) -> Router {
    let state = AppState::new(config, reqwest::Client::new()).unwrap();
    build_router(Arc::new(state))
}

fn image_reply() -> Value {
    json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}]
            },
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 1290, "totalTokenCount": 1295},
        "modelVersion": "gemini-3-pro-image-001"
    })
}

/// Backend mock that only answers when the image config matches.
async fn expect_backend(server: &MockServer, aspect_ratio: &str, image_size: &str) {
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .and(header("x-goog-api-key", "backend-key"))
        .and(body_partial_json(json!({
            "generationConfig": {"imageConfig": {"aspectRatio": aspect_ratio, "imageSize": image_size}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_reply()))
        .expect(1)
        .mount(server)
        .await;
}

async fn expect_no_backend_call(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_reply()))
        .expect(0)
        .mount(server)
        .await;
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn openai_request(body: &Value) -> Request<Body> {
    Request::post("/v1/images/generations")
        .header("authorization", format!("Bearer {KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn anthropic_request(body: &Value) -> Request<Body> {
    Request::post("/v1/messages")
        .header("x-api-key", KEY)
        .header("anthropic-version", "2023-06-01")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn gemini_request(key: &str, body: &Value) -> Request<Body> {
    Request::post(format!("{BACKEND_PATH}?key={key}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ────────────────────────────────────────────────────────────────
// Happy paths, one per protocol
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_openai_generation_16x9_hd() {
    let server = MockServer::start().await;
    // hd with no explicit tier resolves to 4K
    expect_backend(&server, "16:9", "4K").await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        openai_request(&json!({
            "model": "gemini-3-pro-image",
            "prompt": "A cute robot",
            "size": "16:9",
            "quality": "hd",
            "n": 1
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["b64_json"], "iVBORw0KGgo=");
    assert_eq!(body["size"], "4096x2304");
    assert_eq!(body["quality"], "hd");
    assert!(body["created"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_anthropic_generation() {
    let server = MockServer::start().await;
    expect_backend(&server, "1:1", "1K").await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        anthropic_request(&json!({
            "model": "gemini-3-pro-image",
            "messages": [{"role": "user", "content": "A cute robot, minimalist style"}],
            "max_tokens": 1024,
            "size": "1:1",
            "quality": "standard"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "gemini-3-pro-image");
    assert_eq!(body["content"][0]["type"], "image");
    assert_eq!(body["content"][0]["source"]["media_type"], "image/png");
    assert_eq!(body["usage"]["output_tokens"], 1290);
}

#[tokio::test]
async fn test_gemini_native_generation() {
    let server = MockServer::start().await;
    expect_backend(&server, "4:3", "2K").await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        gemini_request(
            KEY,
            &json!({
                "contents": [{"parts": [{"text": "A cute robot, minimalist style"}]}],
                "generationConfig": {"imageConfig": {"aspectRatio": "4:3", "imageSize": "2K"}}
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["candidates"][0]["content"]["parts"][0]["inlineData"]["mimeType"],
        "image/png"
    );
    assert_eq!(body["candidates"][0]["finishReason"], "STOP");
    assert_eq!(body["usageMetadata"]["totalTokenCount"], 1295);
    assert_eq!(body["modelVersion"], "gemini-3-pro-image-001");
}

#[tokio::test]
async fn test_large_inline_input_is_accepted() {
    let server = MockServer::start().await;
    expect_backend(&server, "1:1", "1K").await;
    let app = gateway(config_for(&server));

    let reference = "A".repeat(3 * 1024 * 1024);
    let (status, _) = send(
        app,
        gemini_request(
            KEY,
            &json!({
                "contents": [{"parts": [
                    {"text": "Restyle this photo as a watercolor"},
                    {"inlineData": {"mimeType": "image/png", "data": reference}}
                ]}]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unrecognized_size_uses_backend_default() {
    let server = MockServer::start().await;
    expect_backend(&server, "1:1", "1K").await;
    let app = gateway(config_for(&server));

    let (status, _) = send(
        app,
        openai_request(&json!({
            "model": "gemini-3-pro-image",
            "prompt": "A cute robot",
            "size": "4k ultra"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_model_alias_and_suffix() {
    let server = MockServer::start().await;
    expect_backend(&server, "9:16", "2K").await;
    let mut config = config_for(&server);
    config
        .models
        .insert("dall-e-3".to_string(), "gemini-3-pro-image".to_string());
    let app = gateway(config);

    let (status, _) = send(
        app,
        openai_request(&json!({
            "model": "dall-e-3-9x16-2k",
            "prompt": "A tall lighthouse"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_explicit_quality_beats_hd_suffix() {
    let server = MockServer::start().await;
    expect_backend(&server, "1:1", "1K").await;
    expect_backend(&server, "1:1", "4K").await;

    let (status, body) = send(
        gateway(config_for(&server)),
        openai_request(&json!({
            "model": "gemini-3-pro-image-hd",
            "prompt": "A cute robot",
            "quality": "standard"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["size"], "1024x1024");
    assert_eq!(body["quality"], "standard");

    // Without an explicit quality the suffix still upgrades to 4K
    let (status, body) = send(
        gateway(config_for(&server)),
        openai_request(&json!({
            "model": "gemini-3-pro-image-hd",
            "prompt": "A cute robot"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["size"], "4096x4096");
    assert_eq!(body["quality"], "hd");
}

// ────────────────────────────────────────────────────────────────
// Rejections before dispatch
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gemini_bad_key_never_dispatches() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        gemini_request("bad", &json!({"contents": [{"parts": [{"text": "robot"}]}]})),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["status"], "PERMISSION_DENIED");
    assert_eq!(body["error"]["code"], 403);
}

#[tokio::test]
async fn test_gemini_malformed_query_is_native_error() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        gemini_request(
            &format!("{KEY}&key=other"),
            &json!({"contents": [{"parts": [{"text": "robot"}]}]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_openai_missing_bearer() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;
    let app = gateway(config_for(&server));

    let req = Request::post("/v1/images/generations")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": "gemini-3-pro-image", "prompt": "robot"}).to_string(),
        ))
        .unwrap();
    let (status, body) = send(app, req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "missing_api_key");
}

#[tokio::test]
async fn test_anthropic_missing_version_header() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;
    let app = gateway(config_for(&server));

    let req = Request::post("/v1/messages")
        .header("x-api-key", KEY)
        .header("content-type", "application/json")
        // An empty prompt would also fail; the version check must win.
        .body(Body::from(
            json!({
                "model": "gemini-3-pro-image",
                "max_tokens": 16,
                "messages": [{"role": "user", "content": ""}]
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(app, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("anthropic-version"));
}

#[tokio::test]
async fn test_missing_prompt_in_each_native_shape() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;

    let (status, body) = send(
        gateway(config_for(&server)),
        openai_request(&json!({"model": "gemini-3-pro-image", "prompt": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["param"], "prompt");

    let (status, body) = send(
        gateway(config_for(&server)),
        anthropic_request(&json!({
            "model": "gemini-3-pro-image",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": [{"type": "text", "text": ""}]}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_unsupported_model() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        openai_request(&json!({"model": "dall-e-3", "prompt": "robot"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test]
async fn test_too_many_images() {
    let server = MockServer::start().await;
    expect_no_backend_call(&server).await;
    let mut config = config_for(&server);
    config.backend.max_images = 2;
    let app = gateway(config);

    let (status, _) = send(
        app,
        openai_request(&json!({"model": "gemini-3-pro-image", "prompt": "robots", "n": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ────────────────────────────────────────────────────────────────
// Backend failures
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_backend_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Too many requests", "status": "RESOURCE_EXHAUSTED"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        openai_request(&json!({"model": "gemini-3-pro-image", "prompt": "robot"})),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["type"], "rate_limit_error");
}

#[tokio::test]
async fn test_backend_outage_is_overloaded_for_anthropic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&server)
        .await;
    let app = gateway(config_for(&server));

    let (status, body) = send(
        app,
        anthropic_request(&json!({
            "model": "gemini-3-pro-image",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "robot"}]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "overloaded_error");
}

#[tokio::test]
async fn test_backend_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(image_reply())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.backend.timeout_secs = 1;
    let app = gateway(config);

    let (status, body) = send(
        app,
        gemini_request(KEY, &json!({"contents": [{"parts": [{"text": "robot"}]}]})),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["status"], "DEADLINE_EXCEEDED");
}

// ────────────────────────────────────────────────────────────────
// Concurrency
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_max_concurrency_bounds_backend_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(image_reply())
                .set_delay(Duration::from_millis(800)),
        )
        .expect(2)
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.backend.max_concurrency = 1;
    let app = gateway(config);
    let body = json!({"contents": [{"parts": [{"text": "robot"}]}]});

    let started = Instant::now();
    let (first, second, in_flight) = tokio::join!(
        send(app.clone(), gemini_request(KEY, &body)),
        send(app.clone(), gemini_request(KEY, &body)),
        async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            server.received_requests().await.map_or(0, |r| r.len())
        }
    );

    assert_eq!(in_flight, 1);
    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(second.0, StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_millis(1600));
}

#[tokio::test]
async fn test_dropped_request_releases_its_permit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(image_reply())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.backend.max_concurrency = 1;
    let app = gateway(config);
    let body = json!({"contents": [{"parts": [{"text": "robot"}]}]});

    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        send(app.clone(), gemini_request(KEY, &body)),
    )
    .await;
    assert!(abandoned.is_err());

    let started = Instant::now();
    let (status, _) = send(app, gemini_request(KEY, &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() < Duration::from_secs(4));
}

// ────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_model_listings() {
    let server = MockServer::start().await;
    let mut config = config_for(&server);
    config
        .models
        .insert("dall-e-3".to_string(), "gemini-3-pro-image".to_string());

    let req = Request::get("/v1/models").body(Body::empty()).unwrap();
    let (status, body) = send(gateway(config.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["dall-e-3", "gemini-3-pro-image"]);

    let req = Request::get("/v1beta/models").body(Body::empty()).unwrap();
    let (status, body) = send(gateway(config), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"][1]["name"], "models/gemini-3-pro-image");
}

#[tokio::test]
async fn test_gemini_model_lookup() {
    let server = MockServer::start().await;
    let config = config_for(&server);

    let req = Request::get("/v1beta/models/gemini-3-pro-image")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(gateway(config.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "models/gemini-3-pro-image");
    assert_eq!(body["supportedGenerationMethods"][0], "generateContent");

    let req = Request::get("/v1beta/models/imagen-2").body(Body::empty()).unwrap();
    let (status, body) = send(gateway(config), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], "NOT_FOUND");
}

#[tokio::test]
async fn test_health_routes() {
    let server = MockServer::start().await;
    for route in ["/health", "/healthz"] {
        let req = Request::get(route).body(Body::empty()).unwrap();
        let (status, body) = send(gateway(config_for(&server)), req).await;
        assert_eq!(status, StatusCode::OK, "route {route}");
        assert_eq!(body["status"], "ok");
    }
}

// ────────────────────────────────────────────────────────────────
// Normalization equivalence (no server)
// ────────────────────────────────────────────────────────────────

#[test]
fn test_three_protocols_normalize_identically() {
    let (openai, _) = OpenAiAdapter::parse(
        serde_json::from_value(json!({
            "model": "gemini-3-pro-image",
            "prompt": "A futuristic city",
            "size": "2k",
            "quality": "standard"
        }))
        .unwrap(),
    )
    .unwrap();

    let (anthropic, _) = AnthropicAdapter::parse(
        serde_json::from_value(json!({
            "model": "gemini-3-pro-image",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "A futuristic city"}],
            "size": "2K"
        }))
        .unwrap(),
    )
    .unwrap();

    let (gemini, _) = GeminiAdapter::parse(GeminiCall {
        model: "gemini-3-pro-image".to_string(),
        body: serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "A futuristic city"}]}],
            "generationConfig": {"imageConfig": {"imageSize": "2K"}}
        }))
        .unwrap(),
    })
    .unwrap();

    assert_eq!(openai, anthropic);
    assert_eq!(anthropic, gemini);
    assert_eq!(gemini.resolution, Some(ResolutionTier::TwoK));
    assert_eq!(gemini.aspect_ratio, None);
}

#[test]
fn test_aspect_ratio_equivalence() {
    let (openai, _) = OpenAiAdapter::parse(
        serde_json::from_value(json!({
            "model": "gemini-3-pro-image",
            "prompt": "robot",
            "size": "16:9"
        }))
        .unwrap(),
    )
    .unwrap();

    let (gemini, _) = GeminiAdapter::parse(GeminiCall {
        model: "gemini-3-pro-image".to_string(),
        body: serde_json::from_value(json!({
            "contents": [{"parts": [{"text": "robot"}]}],
            "generationConfig": {"imageConfig": {"aspectRatio": "16:9"}}
        }))
        .unwrap(),
    })
    .unwrap();

    assert_eq!(openai, gemini);
    assert_eq!(openai.aspect_ratio, Some(AspectRatio::Wide16x9));
}
