// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt profiles (§4.4.1): request-shaping rules keyed off substrings of
//! the user's message, narrowing or disabling tool advertisement and
//! rewriting literal text before the request is translated to the upstream
//! schema.
//!
//! Lives here rather than in `relaygate-config`'s persisted schema because a
//! profile is a request-shaping rule evaluated per request, not a connection
//! or resource setting — the rest of that crate's `Config` describes how to
//! reach and budget the upstream, not how to rewrite any one request.
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectedTools {
    /// No narrowing; the full registry is eligible for advertisement.
    Unrestricted,
    /// Only these tool names may be advertised.
    Named(Vec<String>),
}

impl Default for SelectedTools {
    fn default() -> Self {
        SelectedTools::Unrestricted
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptProfile {
    pub name: String,
    /// Substrings of the concatenated user-message text that activate this
    /// profile. Any one match is sufficient.
    pub triggers: Vec<String>,
    /// Literal find → replace applied to the user text once the profile
    /// matches.
    pub text_overrides: HashMap<String, String>,
    pub selected_tools: SelectedTools,
    pub disable_tools: bool,
    pub enable_native_tools: bool,
}

/// First profile (in insertion order) whose trigger substring appears in
/// `user_text` wins; at most one profile activates per request.
pub fn match_profile<'a>(profiles: &'a [PromptProfile], user_text: &str) -> Option<&'a PromptProfile> {
    profiles.iter().find(|p| p.triggers.iter().any(|t| !t.is_empty() && user_text.contains(t.as_str())))
}

pub fn apply_text_overrides(text: &str, profile: &PromptProfile) -> String {
    let mut out = text.to_string();
    for (find, replace) in &profile.text_overrides {
        out = out.replace(find.as_str(), replace.as_str());
    }
    out
}

/// Loads the persisted profile list (`<config_dir>/prompt.json`, §4.8's
/// "persisted state layout"). Missing file is not an error — a fresh
/// install simply has no profiles configured yet.
pub fn load_profiles(path: &Path) -> anyhow::Result<Vec<PromptProfile>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let profiles: Vec<PromptProfile> = serde_json::from_str(&text)?;
    Ok(profiles)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
