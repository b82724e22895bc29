// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic stand-in upstream for orchestrator tests (§8 end-to-end
//! scenarios): a queue of pre-scripted event sequences, one popped per
//! call, with a safe fallback once the queue is drained.
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};

use crate::client::Upstream;
use crate::types::{Conversation, ResponseEvent, ToolDeclaration};

pub struct MockUpstream {
    scripts: Mutex<Vec<Vec<ResponseEvent>>>,
    pub requests_seen: Mutex<Vec<Conversation>>,
}

impl MockUpstream {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always_text(reply: impl Into<String>) -> Self {
        let text = reply.into();
        Self::new(vec![vec![
            ResponseEvent::TextDelta(text),
            ResponseEvent::Usage {
                input_tokens: 5,
                output_tokens: 5,
                cache_read_tokens: 0,
            },
            ResponseEvent::Done,
        ]])
    }

    /// Round 1 emits a tool call, round 2 replies with final text — the
    /// minimal two-round tool-loop fixture most orchestrator tests need.
    pub fn tool_then_text(
        tool_name: impl Into<String>,
        args: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    name: tool_name.into(),
                    args,
                },
                ResponseEvent::Usage {
                    input_tokens: 8,
                    output_tokens: 4,
                    cache_read_tokens: 0,
                },
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(final_text.into()),
                ResponseEvent::Usage {
                    input_tokens: 12,
                    output_tokens: 6,
                    cache_read_tokens: 0,
                },
                ResponseEvent::Done,
            ],
        ])
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn stream_generate(
        &self,
        _model: &str,
        conversation: &Conversation,
        _tools: &[ToolDeclaration],
        _cached_content: Option<&str>,
    ) -> anyhow::Result<BoxStream<'static, ResponseEvent>> {
        self.requests_seen.lock().unwrap().push(conversation.clone());
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![
                    ResponseEvent::TextDelta("[mock: no more scripts]".into()),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events)))
    }

    async fn create_cached_context(
        &self,
        model: &str,
        system_text: &str,
        _ttl: Duration,
    ) -> anyhow::Result<String> {
        Ok(format!(
            "mock-cache/{model}/{:x}",
            md5_like_checksum(system_text)
        ))
    }
}

/// Cheap, dependency-free fixture checksum — this is test scaffolding, not a
/// cache key used anywhere outside [`MockUpstream`].
fn md5_like_checksum(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
