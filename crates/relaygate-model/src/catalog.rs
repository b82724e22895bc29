// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static lookup table for the upstream's per-model input-token limit,
//! used by the budget step (§4.1.3) to size the truncation target before a
//! 0.95 safety margin is applied.
//!
//! There is exactly one upstream here, so no `provider` field is needed —
//! just a flat `model name -> limits` table with a single fallback entry.
use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelLimits {
    pub input_token_limit: u32,
    pub output_token_limit: u32,
}

fn table() -> &'static HashMap<&'static str, ModelLimits> {
    static TABLE: OnceLock<HashMap<&'static str, ModelLimits>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            (
                "default",
                ModelLimits {
                    input_token_limit: 32_000,
                    output_token_limit: 8_192,
                },
            ),
            (
                "flash",
                ModelLimits {
                    input_token_limit: 1_000_000,
                    output_token_limit: 8_192,
                },
            ),
            (
                "pro",
                ModelLimits {
                    input_token_limit: 2_000_000,
                    output_token_limit: 8_192,
                },
            ),
        ])
    })
}

/// Look up `model`'s input/output token limits. Falls back to a substring
/// match against the `"flash"`/`"pro"` family names, then to `"default"`,
/// so an unrecognized but plausible model id still gets a sane budget
/// instead of failing the request.
/// Model ids advertised over `GET /v1/models` — every table entry except
/// the `"default"` fallback, which exists only to size unrecognized model
/// names and is never itself a requestable id.
pub fn known_models() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = table().keys().copied().filter(|k| *k != "default").collect();
    names.sort_unstable();
    names
}

pub fn limits_for(model: &str) -> ModelLimits {
    let t = table();
    if let Some(l) = t.get(model) {
        return *l;
    }
    let lower = model.to_ascii_lowercase();
    for (name, limits) in t {
        if *name != "default" && lower.contains(name) {
            return *limits;
        }
    }
    t["default"]
}

/// Input-token budget after the configured safety margin (§4.1.3).
pub fn input_budget(model: &str, safety_margin: f64) -> u32 {
    let limit = limits_for(model).input_token_limit as f64;
    (limit * safety_margin).floor() as u32
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_excludes_default_fallback() {
        let models = known_models();
        assert!(!models.contains(&"default"));
        assert!(models.contains(&"flash"));
        assert!(models.contains(&"pro"));
    }

    #[test]
    fn known_family_resolves_by_substring() {
        let l = limits_for("models/gemini-2.0-flash-exp");
        assert_eq!(l.input_token_limit, 1_000_000);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let l = limits_for("some-future-model-id");
        assert_eq!(l, table()["default"]);
    }

    #[test]
    fn input_budget_applies_safety_margin() {
        let b = input_budget("default", 0.95);
        assert_eq!(b, (32_000.0_f64 * 0.95).floor() as u32);
    }
}
