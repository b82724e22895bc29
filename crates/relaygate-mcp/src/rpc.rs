// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal JSON-RPC 2.0 framing shared by the process pool and the HTTP
//! dispatch path. No MCP client library is used here — §4.2.1 spells out
//! the wire mechanics procedurally, so the framing is hand-rolled directly
//! against it rather than an unexemplified client API.
use anyhow::bail;
use serde_json::Value;

/// Pulls `result` out of a JSON-RPC response object, turning an `error`
/// field into an `Err` instead.
pub fn extract_result(resp: &Value) -> anyhow::Result<Value> {
    if let Some(err) = resp.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("tool server error");
        bail!("{message}");
    }
    Ok(resp.get("result").cloned().unwrap_or(Value::Null))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
