// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared state handed to every axum handler via [`axum::extract::State`].
use std::path::PathBuf;
use std::sync::Arc;

use relaygate_config::CredentialStore;
use relaygate_core::Orchestrator;
use relaygate_model::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Held separately from `orchestrator.upstream` (a `dyn Upstream` trait
    /// object with no credential-rotation method of its own) so request
    /// handling can re-assert the credential store's current active secret
    /// before every call (§4.8).
    pub upstream_client: Arc<UpstreamClient>,
    pub credentials: Arc<CredentialStore>,
    pub project_root: PathBuf,
    pub allowed_roots: Vec<PathBuf>,
    pub max_code_injection_bytes: usize,
}
