// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/relaygate/config.yaml"));
    paths.push(PathBuf::from("/etc/relaygate/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/relaygate/config.yaml"));
        paths.push(home.join(".config/relaygate/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("relaygate/config.yaml"));
        paths.push(cfg.join("relaygate/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".relaygate/config.yaml"));
    paths.push(PathBuf::from(".relaygate/config.yml"));
    paths.push(PathBuf::from(".relaygate.yaml"));
    paths.push(PathBuf::from(".relaygate.yml"));
    paths.push(PathBuf::from("relaygate.yaml"));
    paths.push(PathBuf::from("relaygate.yml"));

    paths
}

/// Default directory that holds the persisted state layout (`api_keys.json`,
/// `mcp.json`, `prompt.json`, ...).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaygate")
}

/// Load configuration by merging all discovered YAML files, then applying the
/// environment-variable overlay named in the external-interfaces section.
/// `extra` may provide an explicit path (e.g. a `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overlay(&mut config, &std::env::vars().collect::<Vec<_>>());
    Ok(config)
}

/// Apply the environment-variable overlay on top of an already-loaded
/// config. Env wins over every YAML layer. Exposed separately from [`load`]
/// so tests can feed a synthetic environment without touching the process's.
pub fn apply_env_overlay(config: &mut Config, vars: &[(String, String)]) {
    let get = |name: &str| vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    if let Some(v) = get("UPSTREAM_URL") {
        config.upstream.url = v.to_string();
    }
    if let Some(v) = get("SERVER_HOST") {
        config.server.host = v.to_string();
    }
    if let Some(v) = get("SERVER_PORT") {
        if let Ok(port) = v.parse() {
            config.server.port = port;
        }
    }
    if let Some(v) = get("ASYNC_MODE") {
        config.upstream.async_mode = parse_bool(v, config.upstream.async_mode);
    }
    if let Some(v) = get("SELECTIVE_CONTEXT_ENABLED") {
        config.context.selective_context_enabled =
            parse_bool(v, config.context.selective_context_enabled);
    }
    if let Some(v) = get("CONTEXT_MIN_RELEVANCE_SCORE") {
        if let Ok(n) = v.parse() {
            config.context.min_relevance_score = n;
        }
    }
    if let Some(v) = get("CONTEXT_ALWAYS_KEEP_RECENT") {
        if let Ok(n) = v.parse() {
            config.context.always_keep_recent = n;
        }
    }
    if let Some(v) = get("MIN_CONTEXT_CACHING_TOKENS") {
        if let Ok(n) = v.parse() {
            config.upstream.min_context_caching_tokens = n;
        }
    }
    if let Some(v) = get("MAX_CODE_INJECTION_SIZE_KB") {
        if let Ok(n) = v.parse() {
            config.tools.max_code_injection_kb = n;
        }
    }
    if let Some(v) = get("ALLOWED_CODE_PATHS") {
        config.tools.allowed_code_paths = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = get("VERBOSE_LOGGING") {
        config.logging.verbose = parse_bool(v, config.logging.verbose);
    }
    if let Some(v) = get("DEBUG_CLIENT_LOGGING") {
        config.logging.debug_client_logging = parse_bool(v, config.logging.debug_client_logging);
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
