use super::anthropic_types::{
    ErrorResponse, ImageSource, MessagesRequest, MessagesResponse, ResponseContentBlock, Usage,
};
use super::{Protocol, ProtocolAdapter};
use crate::dispatcher::CanonicalImageResult;
use crate::error::{GatewayError, RejectionKind, Result};
use crate::normalize::{RawImageParams, SizeHint};

use axum::http::StatusCode;

/// `POST /v1/messages`
pub struct AnthropicAdapter;

impl ProtocolAdapter for AnthropicAdapter {
    type Request = MessagesRequest;
    /// The model name the caller asked for, echoed back in the response.
    type Context = String;
    type Response = MessagesResponse;
    type ErrorBody = ErrorResponse;

    const PROTOCOL: Protocol = Protocol::Anthropic;

    fn extract(request: MessagesRequest) -> Result<(RawImageParams, String)> {
        if request.stream.unwrap_or(false) {
            return Err(GatewayError::invalid_request(
                "Streaming is not supported for image generation",
            ));
        }

        let raw = RawImageParams {
            model: request.model.clone(),
            prompt: request.last_user_text(),
            size: request.size.map_or(SizeHint::Absent, SizeHint::Token),
            quality: request.quality,
            count: None,
        };
        Ok((raw, request.model))
    }

    fn render(result: CanonicalImageResult, requested_model: String) -> MessagesResponse {
        let mut content = Vec::with_capacity(result.images.len() + 1);
        if let Some(text) = result.text {
            content.push(ResponseContentBlock::Text { text });
        }
        content.extend(result.images.into_iter().map(|image| ResponseContentBlock::Image {
            source: ImageSource {
                source_type: "base64".to_string(),
                media_type: image.mime_type,
                data: image.data,
            },
        }));

        let usage = result.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        MessagesResponse {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: requested_model,
            stop_reason: Some("end_turn".to_string()),
            stop_sequence: None,
            usage,
        }
    }

    fn render_error(err: &GatewayError) -> (StatusCode, ErrorResponse) {
        let error_type = match err {
            GatewayError::Auth { .. } => "authentication_error",
            GatewayError::MissingPrompt | GatewayError::InvalidRequest { .. } => {
                "invalid_request_error"
            }
            GatewayError::UnsupportedModel { .. } => "not_found_error",
            GatewayError::BackendRejected { kind, .. } => match kind {
                RejectionKind::RateLimited | RejectionKind::Quota => "rate_limit_error",
                RejectionKind::ContentPolicy => "invalid_request_error",
                RejectionKind::Unavailable => "overloaded_error",
            },
            _ => "api_error",
        };
        (err.status(), ErrorResponse::new(error_type, err.public_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{GeneratedImage, ResolvedImageSpec, UsageCounters};
    use crate::normalize::{AspectRatio, Quality, ResolutionTier};

    fn request(json: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_prompt_from_last_user_message() {
        let req = request(serde_json::json!({
            "model": "gemini-3-pro-image",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": "draw a cat"},
                {"role": "assistant", "content": "Sure"},
                {"role": "user", "content": [
                    {"type": "text", "text": "A futuristic city"},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "ignored"},
                    {"type": "text", "text": "cinematic lighting"}
                ]}
            ],
            "size": "1k",
            "quality": "standard"
        }));

        let (canonical, model) = AnthropicAdapter::parse(req).unwrap();
        assert_eq!(canonical.prompt, "A futuristic city\ncinematic lighting");
        assert_eq!(canonical.resolution, Some(ResolutionTier::OneK));
        assert_eq!(canonical.aspect_ratio, None);
        assert_eq!(canonical.quality, Quality::Standard);
        assert_eq!(model, "gemini-3-pro-image");
    }

    #[test]
    fn test_empty_user_text_is_missing_prompt() {
        let req = request(serde_json::json!({
            "model": "gemini-3-pro-image",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": [{"type": "text", "text": ""}]}]
        }));
        assert!(matches!(
            AnthropicAdapter::parse(req),
            Err(GatewayError::MissingPrompt)
        ));
    }

    #[test]
    fn test_streaming_rejected() {
        let req = request(serde_json::json!({
            "model": "gemini-3-pro-image",
            "messages": [{"role": "user", "content": "a robot"}],
            "stream": true
        }));
        assert!(matches!(
            AnthropicAdapter::parse(req),
            Err(GatewayError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_render_message_envelope() {
        let result = CanonicalImageResult {
            images: vec![GeneratedImage {
                mime_type: "image/jpeg".to_string(),
                data: "/9j/4AAQ".to_string(),
            }],
            text: Some("Here you go".to_string()),
            model: "gemini-3-pro-image".to_string(),
            spec: ResolvedImageSpec {
                aspect_ratio: AspectRatio::Square,
                resolution: ResolutionTier::OneK,
                quality: Quality::Standard,
            },
            usage: Some(UsageCounters {
                input_tokens: 3,
                output_tokens: 1290,
                total_tokens: 1293,
            }),
        };

        let resp = AnthropicAdapter::render(result, "my-alias".to_string());
        assert!(resp.id.starts_with("msg_"));
        assert_eq!(resp.model, "my-alias");
        assert_eq!(resp.content.len(), 2);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image");
        assert_eq!(json["content"][1]["source"]["type"], "base64");
        assert_eq!(json["content"][1]["source"]["media_type"], "image/jpeg");
        assert_eq!(json["usage"]["output_tokens"], 1290);
    }

    #[test]
    fn test_error_envelope() {
        let (status, body) = AnthropicAdapter::render_error(&GatewayError::missing_credential(
            "x-api-key header is required",
        ));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error_type, "error");
        assert_eq!(body.error.error_type, "authentication_error");
    }
}
