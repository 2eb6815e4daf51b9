//! Protocol adapters.
//!
//! Each supported surface (OpenAI images, Anthropic messages, Google
//! `generateContent`) implements [`ProtocolAdapter`]: pull the image intent out
//! of its own request shape, and wrap a [`CanonicalImageResult`] (or a
//! [`GatewayError`]) back into its own response shape. All adapter functions
//! are pure; the router owns I/O.

pub mod anthropic;
pub mod anthropic_types;
pub mod gemini;
pub mod gemini_types;
pub mod openai;
pub mod openai_types;

use crate::dispatcher::CanonicalImageResult;
use crate::error::{GatewayError, Result};
use crate::normalize::{normalize, CanonicalImageRequest, RawImageParams};

use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// The three inbound wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAi,
    Anthropic,
    Gemini,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        })
    }
}

pub trait ProtocolAdapter {
    /// Decoded inbound request.
    type Request;
    /// Per-request details the renderer needs that the canonical request drops
    /// (requested model name, response format, ...).
    type Context;
    type Response: Serialize;
    type ErrorBody: Serialize;

    const PROTOCOL: Protocol;

    /// Pull raw image fields out of the wire request.
    fn extract(request: Self::Request) -> Result<(RawImageParams, Self::Context)>;

    /// Wrap a backend result in this protocol's success envelope.
    fn render(result: CanonicalImageResult, ctx: Self::Context) -> Self::Response;

    /// This protocol's error envelope and status code.
    fn render_error(err: &GatewayError) -> (StatusCode, Self::ErrorBody);

    fn parse(request: Self::Request) -> Result<(CanonicalImageRequest, Self::Context)> {
        let (raw, ctx) = Self::extract(request)?;
        Ok((normalize(raw)?, ctx))
    }
}
