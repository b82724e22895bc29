// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Caching layer (§4.5): an in-memory tool-output cache keyed by a digest of
//! `(tool_name, args)`, and an upstream context-cache wrapper keyed by
//! `(model, system_instruction)`. Both are thread-safe; concurrent readers
//! never serialize against each other, writers take an exclusive lock.
//! Neither has any cross-process coherence — a second proxy instance starts
//! with an empty cache.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use relaygate_model::Upstream;

const TOOL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const TOOL_CACHE_TARGET_SIZE: usize = 100;
const TOOL_CACHE_EVICT_THRESHOLD: usize = TOOL_CACHE_TARGET_SIZE * 120 / 100;

fn digest_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Canonical JSON: `serde_json::Value`'s `Map` is a `BTreeMap` under
/// `preserve_order` being off, so `to_string()` already serializes object
/// keys in a stable sorted order — no separate canonicalization pass needed.
fn canonical_json(v: &serde_json::Value) -> String {
    v.to_string()
}

struct ToolCacheEntry {
    result: String,
    inserted_at: Instant,
}

/// Tool-output cache (§4.5): never stores results from a mutating tool.
pub struct ToolOutputCache {
    entries: RwLock<HashMap<String, ToolCacheEntry>>,
}

impl ToolOutputCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    fn key(tool_name: &str, args: &serde_json::Value) -> String {
        digest_hex(&[tool_name, &canonical_json(args)])
    }

    pub async fn get(&self, tool_name: &str, args: &serde_json::Value) -> Option<String> {
        let key = Self::key(tool_name, args);
        let entries = self.entries.read().await;
        entries.get(&key).filter(|e| e.inserted_at.elapsed() < TOOL_CACHE_TTL).map(|e| e.result.clone())
    }

    pub async fn insert(&self, tool_name: &str, args: &serde_json::Value, result: String) {
        let key = Self::key(tool_name, args);
        let mut entries = self.entries.write().await;
        entries.insert(key, ToolCacheEntry { result, inserted_at: Instant::now() });
        Self::evict_locked(&mut entries);
    }

    /// Opportunistic cleanup: always drop expired entries; once the map
    /// exceeds 120% of the target size, also drop the oldest entries by
    /// insertion time until it's back at the target.
    fn evict_locked(entries: &mut HashMap<String, ToolCacheEntry>) {
        entries.retain(|_, e| e.inserted_at.elapsed() < TOOL_CACHE_TTL);
        if entries.len() <= TOOL_CACHE_EVICT_THRESHOLD {
            return;
        }
        let mut by_age: Vec<(String, Instant)> = entries.iter().map(|(k, e)| (k.clone(), e.inserted_at)).collect();
        by_age.sort_by_key(|(_, t)| *t);
        let to_drop = entries.len() - TOOL_CACHE_TARGET_SIZE;
        for (k, _) in by_age.into_iter().take(to_drop) {
            entries.remove(&k);
        }
    }
}

impl Default for ToolOutputCache {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Upstream context cache ───────────────────────────────────────────────────

struct ContextCacheEntry {
    cache_handle: String,
    created_at: Instant,
    ttl: Duration,
}

impl ContextCacheEntry {
    fn expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Caches `UpstreamClient::create_cached_context` handles keyed by
/// `(model, system_instruction)` so repeated requests with the same system
/// prompt reference the upstream's cache instead of re-uploading the text.
pub struct ContextCache {
    entries: RwLock<HashMap<String, ContextCacheEntry>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    fn key(model: &str, system_text: &str) -> String {
        digest_hex(&[model, system_text])
    }

    /// Returns a cache handle for `(model, system_text)`, creating one via
    /// `upstream.create_cached_context` on miss or expiry.
    pub async fn get_or_create(
        &self,
        upstream: &dyn Upstream,
        model: &str,
        system_text: &str,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        let key = Self::key(model, system_text);
        {
            let entries = self.entries.read().await;
            if let Some(e) = entries.get(&key) {
                if !e.expired() {
                    return Ok(e.cache_handle.clone());
                }
            }
        }
        let handle = upstream.create_cached_context(model, system_text, ttl).await?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| !e.expired());
        entries.insert(key, ContextCacheEntry { cache_handle: handle.clone(), created_at: Instant::now(), ttl });
        Ok(handle)
    }
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_model::MockUpstream;
    use serde_json::json;

    #[tokio::test]
    async fn miss_then_hit_returns_inserted_value() {
        let cache = ToolOutputCache::new();
        assert!(cache.get("read_file", &json!({"path": "a"})).await.is_none());
        cache.insert("read_file", &json!({"path": "a"}), "contents".into()).await;
        assert_eq!(cache.get("read_file", &json!({"path": "a"})).await, Some("contents".into()));
    }

    #[tokio::test]
    async fn different_args_are_different_cache_keys() {
        let cache = ToolOutputCache::new();
        cache.insert("read_file", &json!({"path": "a"}), "a-contents".into()).await;
        assert!(cache.get("read_file", &json!({"path": "b"})).await.is_none());
    }

    #[tokio::test]
    async fn key_order_of_json_object_fields_does_not_matter() {
        let cache = ToolOutputCache::new();
        cache.insert("t", &json!({"a": 1, "b": 2}), "x".into()).await;
        assert_eq!(cache.get("t", &json!({"b": 2, "a": 1})).await, Some("x".into()));
    }

    #[tokio::test]
    async fn eviction_keeps_size_near_target_once_threshold_exceeded() {
        let cache = ToolOutputCache::new();
        for i in 0..130 {
            cache.insert("t", &json!({"i": i}), format!("v{i}")).await;
        }
        let entries = cache.entries.read().await;
        assert!(entries.len() <= TOOL_CACHE_EVICT_THRESHOLD);
    }

    #[tokio::test]
    async fn context_cache_reuses_handle_on_second_call_for_same_key() {
        let upstream = MockUpstream::always_text("ignored");
        let cache = ContextCache::new();
        let h1 = cache.get_or_create(&upstream, "model-a", "system text", Duration::from_secs(60)).await.unwrap();
        let h2 = cache.get_or_create(&upstream, "model-a", "system text", Duration::from_secs(60)).await.unwrap();
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn context_cache_distinguishes_by_model_and_system_text() {
        let upstream = MockUpstream::always_text("ignored");
        let cache = ContextCache::new();
        let h1 = cache.get_or_create(&upstream, "model-a", "sys-1", Duration::from_secs(60)).await.unwrap();
        let h2 = cache.get_or_create(&upstream, "model-a", "sys-2", Duration::from_secs(60)).await.unwrap();
        assert_ne!(h1, h2);
    }
}
