// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Single-shot JSON-RPC dispatch to an `Http` tool server (§4.2.1): one
//! POST per call, no persistent connection state to manage.
use anyhow::Context as _;
use serde_json::{json, Value};

use crate::config::HttpServerConfig;

pub async fn call(
    client: &reqwest::Client,
    cfg: &HttpServerConfig,
    method: &str,
    params: Value,
    id: u64,
) -> anyhow::Result<Value> {
    let mut req = client.post(&cfg.url).json(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }));
    for (k, v) in &cfg.headers {
        req = req.header(k, v);
    }
    let resp = req.send().await.with_context(|| format!("POST {}", cfg.url))?;
    let body: Value = resp
        .json()
        .await
        .context("decoding tool server JSON-RPC response")?;
    crate::rpc::extract_result(&body)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
