// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Stable JSON error envelope (§7 `CredentialMissing`/malformed-request
//! responses), shaped after the OpenAI error object so client SDKs built
//! against that API parse it without special-casing this proxy.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

pub fn error_response(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: ErrorDetail { message: message.into(), kind } })).into_response()
}

pub fn credential_missing() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "credential_missing", "no active API key is configured")
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, "invalid_request_error", message)
}
