//! The single outbound path to the backend image model.
//!
//! A [`CanonicalImageRequest`] comes in fully normalized. The dispatcher picks
//! the backend model, fills in defaults for anything left unspecified, makes
//! exactly one `generateContent` call and folds the reply (or the failure)
//! into the gateway's own types.
//!
//! The backend call is an ordinary future owned by the request handler. When
//! the client goes away hyper drops the handler, which drops the in-flight
//! `reqwest` request with it.

use crate::config::{BackendConfig, GatewayConfig};
use crate::error::{GatewayError, RejectionKind, Result};
use crate::normalize::{AspectRatio, CanonicalImageRequest, Quality, ResolutionTier};
use crate::translate::gemini_types::{
    Content, ErrorResponse, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    ImageConfig, Part,
};

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Semaphore;

const BLOCKED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

/// Canonical request with every default applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedImageSpec {
    pub aspect_ratio: AspectRatio,
    pub resolution: ResolutionTier,
    pub quality: Quality,
}

impl ResolvedImageSpec {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.aspect_ratio.dimensions(self.resolution)
    }

    /// `WIDTHxHEIGHT`, the way OpenAI clients spell sizes.
    #[must_use]
    pub fn pixel_size(&self) -> String {
        let (w, h) = self.dimensions();
        format!("{w}x{h}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 payload as produced by the backend.
    pub data: String,
}

impl GeneratedImage {
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// What the backend produced for one request.
#[derive(Debug, Clone)]
pub struct CanonicalImageResult {
    pub images: Vec<GeneratedImage>,
    /// Text the backend returned alongside the images, if any.
    pub text: Option<String>,
    /// Backend model actually used.
    pub model: String,
    pub spec: ResolvedImageSpec,
    pub usage: Option<UsageCounters>,
}

pub struct Dispatcher {
    client: reqwest::Client,
    backend: BackendConfig,
    aliases: HashMap<String, String>,
    api_key: String,
    permits: Semaphore,
}

impl Dispatcher {
    /// Build a dispatcher from the gateway config. Fails when no backend key
    /// can be resolved.
    pub fn new(config: &GatewayConfig, client: reqwest::Client) -> Result<Self> {
        let api_key = config.backend.resolve_api_key()?;
        Ok(Self {
            client,
            backend: config.backend.clone(),
            aliases: config.models.clone(),
            api_key,
            permits: Semaphore::new(config.backend.max_concurrency.max(1)),
        })
    }

    /// Backend model ids this dispatcher accepts directly.
    #[must_use]
    pub fn backend_models(&self) -> &[String] {
        &self.backend.models
    }

    /// Map a requested model (backend id or configured alias) to a backend id.
    pub fn resolve_model(&self, model: &str) -> Result<String> {
        if self.backend.models.iter().any(|m| m == model) {
            return Ok(model.to_string());
        }
        self.aliases
            .get(model)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedModel {
                model: model.to_string(),
            })
    }

    #[must_use]
    pub fn resolve_spec(&self, req: &CanonicalImageRequest) -> ResolvedImageSpec {
        let resolution = req.resolution.unwrap_or(match req.quality {
            Quality::Hd => ResolutionTier::FourK,
            Quality::Standard => self.backend.default_resolution,
        });
        ResolvedImageSpec {
            aspect_ratio: req
                .aspect_ratio
                .unwrap_or(self.backend.default_aspect_ratio),
            resolution,
            quality: req.quality,
        }
    }

    pub async fn dispatch(&self, req: CanonicalImageRequest) -> Result<CanonicalImageResult> {
        let model = self.resolve_model(&req.model)?;
        if req.count > self.backend.max_images {
            return Err(GatewayError::invalid_request(format!(
                "n must be between 1 and {}",
                self.backend.max_images
            )));
        }

        let spec = self.resolve_spec(&req);
        let body = build_backend_request(&req, &spec);

        tracing::info!(
            model = %model,
            aspect_ratio = %spec.aspect_ratio,
            resolution = %spec.resolution,
            quality = spec.quality.as_str(),
            count = req.count,
            "Dispatching image request"
        );

        let secs = self.backend.timeout_secs;
        let response = tokio::time::timeout(Duration::from_secs(secs), async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| GatewayError::internal(format!("Dispatcher closed: {e}")))?;
            self.call_backend(&model, &body).await
        })
        .await
        .map_err(|_| GatewayError::BackendTimeout { secs })??;

        let result = interpret_response(response, model, spec, req.count)?;
        tracing::info!(
            model = %result.model,
            images = result.images.len(),
            "Backend returned images"
        );
        Ok(result)
    }

    async fn call_backend(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.backend.base_url.trim_end_matches('/'),
            model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        tracing::debug!(status, body_len = text.len(), "Backend response");

        if status >= 400 {
            return Err(classify_backend_error(status, &text, model));
        }

        serde_json::from_str(&text).map_err(|e| {
            GatewayError::internal(format!(
                "Failed to parse backend response: {}. Body: {}",
                e,
                truncate(&text, 300)
            ))
        })
    }

    fn map_transport_error(&self, e: &reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::BackendTimeout {
                secs: self.backend.timeout_secs,
            }
        } else if e.is_connect() {
            GatewayError::rejected(
                RejectionKind::Unavailable,
                "Backend is unreachable".to_string(),
            )
        } else {
            GatewayError::internal(format!("Backend request failed: {e}"))
        }
    }
}

/// The `generateContent` body sent to the backend.
#[must_use]
pub fn build_backend_request(
    req: &CanonicalImageRequest,
    spec: &ResolvedImageSpec,
) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(&req.prompt)],
        }],
        generation_config: Some(GenerationConfig {
            candidate_count: Some(req.count),
            response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            image_config: Some(ImageConfig {
                aspect_ratio: Some(spec.aspect_ratio.as_str().to_string()),
                image_size: Some(spec.resolution.as_str().to_string()),
            }),
            extra: HashMap::new(),
        }),
        ..GenerateContentRequest::default()
    }
}

/// Map a backend error status/body onto the shared failure taxonomy.
#[must_use]
pub fn classify_backend_error(status: u16, body: &str, model: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| truncate(body, 300).to_string());
    let lower = message.to_ascii_lowercase();

    match status {
        429 if lower.contains("quota") => GatewayError::rejected(RejectionKind::Quota, message),
        429 => GatewayError::rejected(RejectionKind::RateLimited, message),
        400 if ["safety", "policy", "blocked", "prohibited"]
            .iter()
            .any(|w| lower.contains(w)) =>
        {
            GatewayError::rejected(RejectionKind::ContentPolicy, message)
        }
        400 => GatewayError::invalid_request(message),
        404 => GatewayError::UnsupportedModel {
            model: model.to_string(),
        },
        401 | 403 => {
            GatewayError::internal(format!("Backend refused gateway credentials: {message}"))
        }
        s if s >= 500 => GatewayError::rejected(RejectionKind::Unavailable, message),
        s => GatewayError::internal(format!("Backend returned status {s}: {message}")),
    }
}

/// Pull images, text and usage out of a successful backend reply.
pub fn interpret_response(
    resp: GenerateContentResponse,
    model: String,
    spec: ResolvedImageSpec,
    count: u32,
) -> Result<CanonicalImageResult> {
    if let Some(reason) = resp
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(GatewayError::rejected(
            RejectionKind::ContentPolicy,
            format!("Prompt blocked by backend: {reason}"),
        ));
    }

    let mut images = Vec::new();
    let mut texts = Vec::new();
    for content in resp.candidates.iter().filter_map(|c| c.content.as_ref()) {
        for part in &content.parts {
            if part.thought.unwrap_or(false) {
                continue;
            }
            if let Some(ref inline) = part.inline_data {
                if inline.mime_type.starts_with("image/") {
                    images.push(GeneratedImage {
                        mime_type: inline.mime_type.clone(),
                        data: inline.data.clone(),
                    });
                }
            } else if let Some(ref text) = part.text {
                if !text.trim().is_empty() {
                    texts.push(text.trim().to_string());
                }
            }
        }
    }

    if images.is_empty() {
        let blocked = resp
            .candidates
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .find(|r| BLOCKED_FINISH_REASONS.contains(r));
        return Err(match blocked {
            Some(reason) => GatewayError::rejected(
                RejectionKind::ContentPolicy,
                format!("Image generation blocked by backend: {reason}"),
            ),
            None => GatewayError::rejected(
                RejectionKind::Unavailable,
                "Backend returned no image data",
            ),
        });
    }
    images.truncate(count as usize);

    let usage = resp.usage_metadata.map(|u| UsageCounters {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
    });

    Ok(CanonicalImageResult {
        images,
        text: (!texts.is_empty()).then(|| texts.join("\n")),
        model: resp.model_version.unwrap_or(model),
        spec,
        usage,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
