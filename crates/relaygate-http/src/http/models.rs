// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `GET /v1/models` (§6): lists the model ids this proxy has catalog entries
//! (and therefore budget/behavior knowledge) for.
use axum::extract::State;
use axum::Json;

use relaygate_model::catalog;

use crate::openai::{ModelEntry, ModelsResponse};
use crate::state::AppState;

/// Fixed boot-time stamp reused for every entry. Real upstream model-info
/// endpoints carry a per-model creation date; this proxy's catalog has no
/// such field, so "created" collapses to "when this server started".
fn boot_epoch_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

pub async fn list_models(State(_state): State<AppState>) -> Json<ModelsResponse> {
    let created = boot_epoch_secs();
    let data = catalog::known_models()
        .into_iter()
        .map(|id| ModelEntry { id: id.to_string(), object: "model", created, owned_by: "relaygate".to_string() })
        .collect();
    Json(ModelsResponse { object: "list", data })
}
