use super::openai_types::{
    ErrorResponse, ImageData, ImagesRequest, ImagesResponse, ImagesUsage, ResponseFormat,
};
use super::{Protocol, ProtocolAdapter};
use crate::dispatcher::CanonicalImageResult;
use crate::error::{AuthFailure, GatewayError, RejectionKind, Result};
use crate::normalize::{RawImageParams, SizeHint};

use axum::http::StatusCode;

/// `POST /v1/images/generations`
pub struct OpenAiAdapter;

impl ProtocolAdapter for OpenAiAdapter {
    type Request = ImagesRequest;
    type Context = ResponseFormat;
    type Response = ImagesResponse;
    type ErrorBody = ErrorResponse;

    const PROTOCOL: Protocol = Protocol::OpenAi;

    fn extract(request: ImagesRequest) -> Result<(RawImageParams, ResponseFormat)> {
        let raw = RawImageParams {
            model: request.model,
            prompt: request.prompt,
            size: request.size.map_or(SizeHint::Absent, SizeHint::Token),
            quality: request.quality,
            count: request.n,
        };
        Ok((raw, request.response_format.unwrap_or_default()))
    }

    fn render(result: CanonicalImageResult, format: ResponseFormat) -> ImagesResponse {
        let revised_prompt = result.text.clone();
        let data = result
            .images
            .iter()
            .map(|image| match format {
                ResponseFormat::B64Json => ImageData {
                    b64_json: Some(image.data.clone()),
                    url: None,
                    revised_prompt: revised_prompt.clone(),
                },
                ResponseFormat::Url => ImageData {
                    b64_json: None,
                    url: Some(image.data_uri()),
                    revised_prompt: revised_prompt.clone(),
                },
            })
            .collect();

        ImagesResponse {
            created: chrono::Utc::now().timestamp(),
            data,
            size: Some(result.spec.pixel_size()),
            quality: Some(result.spec.quality.as_str().to_string()),
            usage: result.usage.map(|u| ImagesUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                total_tokens: u.total_tokens,
            }),
        }
    }

    fn render_error(err: &GatewayError) -> (StatusCode, ErrorResponse) {
        let message = err.public_message();
        let body = match err {
            GatewayError::Auth { failure, .. } => {
                let code = match failure {
                    AuthFailure::Missing => "missing_api_key",
                    AuthFailure::Invalid => "invalid_api_key",
                };
                ErrorResponse::new("invalid_request_error", Some(code), message)
            }
            GatewayError::MissingPrompt => {
                ErrorResponse::new("invalid_request_error", None, message).with_param("prompt")
            }
            GatewayError::InvalidRequest { .. } => {
                ErrorResponse::new("invalid_request_error", None, message)
            }
            GatewayError::UnsupportedModel { .. } => {
                ErrorResponse::new("invalid_request_error", Some("model_not_found"), message)
                    .with_param("model")
            }
            GatewayError::BackendTimeout { .. } => {
                ErrorResponse::new("server_error", Some("timeout"), message)
            }
            GatewayError::BackendRejected { kind, .. } => match kind {
                RejectionKind::RateLimited => {
                    ErrorResponse::new("rate_limit_error", Some("rate_limit_exceeded"), message)
                }
                RejectionKind::Quota => {
                    ErrorResponse::new("insufficient_quota", Some("insufficient_quota"), message)
                }
                RejectionKind::ContentPolicy => ErrorResponse::new(
                    "invalid_request_error",
                    Some("content_policy_violation"),
                    message,
                ),
                RejectionKind::Unavailable => ErrorResponse::new("server_error", None, message),
            },
            _ => ErrorResponse::new("server_error", None, message),
        };
        (err.status(), body)
    }
}
