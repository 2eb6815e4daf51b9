use super::gemini_types::{
    Candidate, Content, ErrorResponse, GenerateContentRequest, GenerateContentResponse, Part,
    UsageMetadata,
};
use super::{Protocol, ProtocolAdapter};
use crate::dispatcher::CanonicalImageResult;
use crate::error::{AuthFailure, GatewayError, Result};
use crate::normalize::{RawImageParams, SizeHint};

use axum::http::StatusCode;

/// `POST /v1beta/models/{model}:generateContent`
pub struct GeminiAdapter;

/// Body plus the model named in the URL path.
#[derive(Debug, Clone)]
pub struct GeminiCall {
    pub model: String,
    pub body: GenerateContentRequest,
}

impl ProtocolAdapter for GeminiAdapter {
    type Request = GeminiCall;
    type Context = ();
    type Response = GenerateContentResponse;
    type ErrorBody = ErrorResponse;

    const PROTOCOL: Protocol = Protocol::Gemini;

    fn extract(call: GeminiCall) -> Result<(RawImageParams, ())> {
        let prompt = call
            .body
            .contents
            .iter()
            .rev()
            .find(|c| c.role.as_deref().map_or(true, |r| r == "user"))
            .map(Content::text);

        let config = call.body.generation_config.as_ref();
        let size = config
            .and_then(|g| g.image_config.as_ref())
            .map_or(SizeHint::Absent, |ic| SizeHint::Structured {
                aspect_ratio: ic.aspect_ratio.clone(),
                image_size: ic.image_size.clone(),
            });

        let raw = RawImageParams {
            model: call.model,
            prompt,
            size,
            quality: None,
            count: config.and_then(|g| g.candidate_count),
        };
        Ok((raw, ()))
    }

    fn render(result: CanonicalImageResult, (): ()) -> GenerateContentResponse {
        let mut text = result.text.map(Part::text);
        let candidates = result
            .images
            .into_iter()
            .enumerate()
            .map(|(index, image)| {
                let mut parts = Vec::with_capacity(2);
                parts.extend(text.take());
                parts.push(Part::inline(image.mime_type, image.data));
                Candidate {
                    content: Some(Content {
                        role: Some("model".to_string()),
                        parts,
                    }),
                    finish_reason: Some("STOP".to_string()),
                    index: u32::try_from(index).ok(),
                }
            })
            .collect();

        GenerateContentResponse {
            candidates,
            prompt_feedback: None,
            usage_metadata: result.usage.map(|u| UsageMetadata {
                prompt_token_count: u.input_tokens,
                candidates_token_count: u.output_tokens,
                total_token_count: u.total_tokens,
            }),
            model_version: Some(result.model),
        }
    }

    fn render_error(err: &GatewayError) -> (StatusCode, ErrorResponse) {
        let status = match err {
            GatewayError::Auth {
                failure: AuthFailure::Invalid,
                ..
            } => StatusCode::FORBIDDEN,
            _ => err.status(),
        };
        let status_name = match status {
            StatusCode::UNAUTHORIZED => "UNAUTHENTICATED",
            StatusCode::FORBIDDEN => "PERMISSION_DENIED",
            StatusCode::BAD_REQUEST => "INVALID_ARGUMENT",
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::TOO_MANY_REQUESTS => "RESOURCE_EXHAUSTED",
            StatusCode::GATEWAY_TIMEOUT => "DEADLINE_EXCEEDED",
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => "UNAVAILABLE",
            _ => "INTERNAL",
        };
        (
            status,
            ErrorResponse::new(status.as_u16(), status_name, err.public_message()),
        )
    }
}
