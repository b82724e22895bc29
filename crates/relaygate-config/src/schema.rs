// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Top-level typed configuration record.
///
/// Loaded by [`crate::load`] from a layered set of YAML files and then
/// overlaid with the environment variables named in the external-interfaces
/// section (`UPSTREAM_URL`, `SERVER_HOST`, ...). Persisted back to the
/// workspace-local config layer whenever a runtime edit occurs (the `reload`
/// hook on [`crate::ConfigStore`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            server: ServerConfig::default(),
            context: ContextConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Upstream model service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream generative model service. Required — boot
    /// fails with `ConfigurationError` when this is empty and `UPSTREAM_URL`
    /// is unset.
    #[serde(default)]
    pub url: String,
    /// Cooperative single-event-loop (async) scheduling by default; threads
    /// mode as a fallback (spec §5). Mirrors `ASYNC_MODE`.
    #[serde(default = "default_true")]
    pub async_mode: bool,
    /// Safety margin applied to the upstream model's advertised input-token
    /// limit before budgeting the conversation (§4.1 step 3).
    #[serde(default = "default_budget_margin")]
    pub budget_margin: f32,
    /// Maximum tool-loop iterations before the orchestrator emits the last
    /// partial response and stops (§8 invariant, default 16).
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Minimum system-instruction token estimate that triggers an attempt to
    /// obtain a server-side cached context handle. Mirrors
    /// `MIN_CONTEXT_CACHING_TOKENS`.
    #[serde(default = "default_min_context_caching_tokens")]
    pub min_context_caching_tokens: usize,
    /// TTL in seconds requested when creating an upstream cached context.
    #[serde(default = "default_cached_context_ttl_secs")]
    pub cached_context_ttl_secs: u64,
    /// Cap on the number of tool declarations advertised in a single request.
    #[serde(default = "default_max_tool_declarations")]
    pub max_tool_declarations: usize,
}

fn default_budget_margin() -> f32 {
    0.95
}
fn default_max_tool_rounds() -> u32 {
    16
}
fn default_min_context_caching_tokens() -> usize {
    4096
}
fn default_cached_context_ttl_secs() -> u64 {
    3600
}
fn default_max_tool_declarations() -> usize {
    64
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            async_mode: true,
            budget_margin: default_budget_margin(),
            max_tool_rounds: default_max_tool_rounds(),
            min_context_caching_tokens: default_min_context_caching_tokens(),
            cached_context_ttl_secs: default_cached_context_ttl_secs(),
            max_tool_declarations: default_max_tool_declarations(),
        }
    }
}

/// Listen address for the OpenAI-compatible HTTP/SSE surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Context-windowing thresholds (§4.4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Enables the selective-keyword-keep tier. Mirrors
    /// `SELECTIVE_CONTEXT_ENABLED`.
    #[serde(default = "default_true")]
    pub selective_context_enabled: bool,
    /// Minimum relevance score `0.7*coverage + 0.3*min(1, occurrences/5)` for
    /// a message to be eligible for selective retention. Mirrors
    /// `CONTEXT_MIN_RELEVANCE_SCORE`.
    #[serde(default = "default_min_relevance_score")]
    pub min_relevance_score: f32,
    /// Number of most-recent non-system messages always kept verbatim.
    /// Mirrors `CONTEXT_ALWAYS_KEEP_RECENT`.
    #[serde(default = "default_always_keep_recent")]
    pub always_keep_recent: usize,
    /// Fraction of the token budget the selective-keep tier targets.
    #[serde(default = "default_selective_target_fraction")]
    pub selective_target_fraction: f32,
}

fn default_min_relevance_score() -> f32 {
    0.15
}
fn default_always_keep_recent() -> usize {
    5
}
fn default_selective_target_fraction() -> f32 {
    0.80
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            selective_context_enabled: true,
            min_relevance_score: default_min_relevance_score(),
            always_keep_recent: default_always_keep_recent(),
            selective_target_fraction: default_selective_target_fraction(),
        }
    }
}

/// Built-in tool sandbox & injection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout in seconds for a single tool call (execute / external process).
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum size in KiB of concatenated text injected by a `code_path=`
    /// directive. Mirrors `MAX_CODE_INJECTION_SIZE_KB`.
    #[serde(default = "default_max_code_injection_kb")]
    pub max_code_injection_kb: usize,
    /// Global allow-list of project roots a request's project-root directive
    /// must be a prefix of, when non-empty. Mirrors `ALLOWED_CODE_PATHS`
    /// (comma-separated).
    #[serde(default)]
    pub allowed_code_paths: Vec<String>,
    /// Path to an external tool-server registry file
    /// (`<config_dir>/mcp.json`).
    #[serde(default)]
    pub mcp_config_path: Option<String>,
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_max_code_injection_kb() -> usize {
    256
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            max_code_injection_kb: default_max_code_injection_kb(),
            allowed_code_paths: Vec::new(),
            mcp_config_path: None,
        }
    }
}

/// Mirrors `VERBOSE_LOGGING` / `DEBUG_CLIENT_LOGGING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,
    /// Logs raw upstream request/response bodies at `debug!`. Off by
    /// default — bodies may contain user content.
    #[serde(default)]
    pub debug_client_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            debug_client_logging: false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
