//! Credential checks, one convention per protocol.
//!
//! - OpenAI: `Authorization: Bearer <key>`
//! - Anthropic: `x-api-key: <key>` plus a recognized `anthropic-version`
//! - Google: `?key=<key>` (or the `x-goog-api-key` header)

use crate::error::{GatewayError, Result};
use crate::translate::Protocol;

use axum::http::HeaderMap;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The credential the caller presented, if it used its protocol's convention.
#[must_use]
pub fn presented_key<'a>(
    protocol: Protocol,
    headers: &'a HeaderMap,
    query_key: Option<&'a str>,
) -> Option<&'a str> {
    match protocol {
        Protocol::OpenAi => header(headers, "authorization").and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
                .map(str::trim)
        }),
        Protocol::Anthropic => header(headers, "x-api-key"),
        Protocol::Gemini => query_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or_else(|| header(headers, "x-goog-api-key")),
    }
}

/// Verify the caller's credential against the configured client keys.
pub fn authenticate(
    protocol: Protocol,
    headers: &HeaderMap,
    query_key: Option<&str>,
    keys: &[String],
) -> Result<()> {
    let Some(presented) = presented_key(protocol, headers, query_key) else {
        return Err(GatewayError::missing_credential(match protocol {
            Protocol::OpenAi => "Missing bearer token in Authorization header",
            Protocol::Anthropic => "x-api-key header is required",
            Protocol::Gemini => "API key missing. Pass it as the 'key' query parameter",
        }));
    };

    if keys.iter().any(|k| k == presented) {
        Ok(())
    } else {
        Err(GatewayError::invalid_credential("Incorrect API key provided"))
    }
}

/// The Anthropic surface requires a known `anthropic-version` header.
pub fn check_anthropic_version(headers: &HeaderMap, accepted: &[String]) -> Result<()> {
    match header(headers, "anthropic-version") {
        None => Err(GatewayError::invalid_request(
            "anthropic-version: header is required",
        )),
        Some(v) if accepted.iter().any(|a| a == v) => Ok(()),
        Some(v) => Err(GatewayError::invalid_request(format!(
            "anthropic-version: unsupported version '{v}'"
        ))),
    }
}
