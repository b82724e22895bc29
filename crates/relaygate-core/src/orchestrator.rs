// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The orchestrator (§4.1): drives one client request end to end — shape,
//! budget, and the model/tool loop — emitting [`OrchestratorEvent`]s the
//! HTTP layer turns into OpenAI-compatible SSE chunks.
//!
//! Cancellation is cooperative: a `oneshot::Receiver<()>` raced against the
//! in-flight step via `tokio::select! { biased; ... }`, checked again at the
//! top of every round, committing any partial text before bailing out.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use relaygate_config::{ContextConfig, UpstreamConfig};
use relaygate_model::catalog;
use relaygate_model::{Conversation, Message, Part, ResponseEvent, Role, ToolDeclaration, Upstream};
use relaygate_tools::{RequestContext, ToolCall};

use crate::cache::ContextCache;
use crate::dispatcher::Dispatcher;
use crate::events::OrchestratorEvent;
use crate::path_directives::expand_directives;
use crate::profiles::{apply_text_overrides, match_profile, PromptProfile, SelectedTools};
use crate::windowing;

/// Everything one request needs for the model/tool loop, assembled once by
/// the HTTP layer per incoming call.
pub struct Orchestrator {
    pub upstream: Arc<dyn Upstream>,
    pub dispatcher: Arc<Dispatcher>,
    pub context_cache: Arc<ContextCache>,
    pub profiles: Vec<PromptProfile>,
    pub upstream_cfg: UpstreamConfig,
    pub context_cfg: ContextConfig,
}

impl Orchestrator {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        dispatcher: Arc<Dispatcher>,
        context_cache: Arc<ContextCache>,
        profiles: Vec<PromptProfile>,
        upstream_cfg: UpstreamConfig,
        context_cfg: ContextConfig,
    ) -> Self {
        Self { upstream, dispatcher, context_cache, profiles, upstream_cfg, context_cfg }
    }

    /// Drives the full request to completion, streaming events on `tx`.
    /// Always terminates with exactly one [`OrchestratorEvent::Done`] unless
    /// cancelled, matching the client-visible contract of "every stream
    /// ends cleanly".
    pub async fn run(
        &self,
        model: &str,
        input_messages: Vec<Message>,
        project_root: PathBuf,
        allowed_roots: Vec<PathBuf>,
        max_code_injection_bytes: usize,
        tx: mpsc::Sender<OrchestratorEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let (mut conversation, project_root) = self.shape(input_messages, project_root, max_code_injection_bytes);
        let ctx = RequestContext::new(project_root).with_allowed_roots(allowed_roots);

        let budget_tokens = catalog::input_budget(model, self.upstream_cfg.budget_margin as f64) as usize;
        let prompt_text = concatenated_user_text(&conversation);
        let profile = match_profile(&self.profiles, &prompt_text).cloned();

        let mut rounds = 0u32;
        loop {
            if cancel.try_recv().is_ok() {
                let _ = tx.send(OrchestratorEvent::Done).await;
                return Ok(());
            }

            rounds += 1;
            if rounds > self.upstream_cfg.max_tool_rounds {
                let _ = tx.send(OrchestratorEvent::Error(format!(
                    "exceeded maximum of {} tool-call rounds",
                    self.upstream_cfg.max_tool_rounds
                ))).await;
                let _ = tx.send(OrchestratorEvent::Done).await;
                return Ok(());
            }

            // 4a: window against the budget using the latest user text.
            let current_query = last_user_text(&conversation);
            let before = conversation.messages.len();
            if let Some(tier) = windowing::fit_budget(&mut conversation.messages, &current_query, budget_tokens, &self.context_cfg) {
                let after = conversation.messages.len();
                let _ = tx
                    .send(OrchestratorEvent::ContextWindowed { tier, messages_before: before, messages_after: after })
                    .await;
            }

            // 4b: decide tool advertising.
            let declarations = self.select_declarations(profile.as_ref(), &current_query).await;

            // 4c: decide context caching.
            let cached_content = match self.maybe_cache_context(model, &conversation).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "context-cache creation failed, inlining system instruction instead");
                    None
                }
            };

            // 4d: issue the streaming request.
            let issued = tokio::select! {
                biased;
                _ = &mut cancel => None,
                result = self.upstream.stream_generate(model, &conversation, &declarations, cached_content.as_deref()) => Some(result),
            };
            let mut stream = match issued {
                None => {
                    let _ = tx.send(OrchestratorEvent::Done).await;
                    return Ok(());
                }
                Some(Err(e)) => {
                    let _ = tx.send(OrchestratorEvent::Error(e.to_string())).await;
                    let _ = tx.send(OrchestratorEvent::Done).await;
                    return Ok(());
                }
                Some(Ok(s)) => s,
            };

            // 4e: stream-parse (framing/decoding already happened inside
            // the `Upstream` impl; here we fold the decoded events).
            let mut text = String::new();
            let mut model_response_parts: Vec<Part> = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut usage = (0u32, 0u32, 0u32);
            let mut upstream_error = None;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = &mut cancel => None,
                    ev = stream.next() => Some(ev),
                };
                let event = match next {
                    None => {
                        if !text.is_empty() {
                            conversation.push(Message::new(Role::Assistant, vec![Part::Text(text)]));
                        }
                        let _ = tx.send(OrchestratorEvent::Done).await;
                        return Ok(());
                    }
                    Some(None) => break,
                    Some(Some(ev)) => ev,
                };
                match event {
                    ResponseEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        let _ = tx.send(OrchestratorEvent::TextDelta(delta)).await;
                    }
                    ResponseEvent::ToolCall { name, args } => {
                        let id = Uuid::new_v4().to_string();
                        model_response_parts.push(Part::ToolCall { name: name.clone(), args: args.clone() });
                        calls.push(ToolCall { id, name, args });
                    }
                    ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens } => {
                        usage = (input_tokens, output_tokens, cache_read_tokens);
                    }
                    ResponseEvent::Error(msg) => {
                        upstream_error = Some(msg);
                        break;
                    }
                    ResponseEvent::Done => break,
                }
            }

            if let Some(msg) = upstream_error {
                let _ = tx.send(OrchestratorEvent::Error(msg)).await;
                let _ = tx.send(OrchestratorEvent::Done).await;
                return Ok(());
            }

            if !text.is_empty() {
                model_response_parts.insert(0, Part::Text(text.clone()));
            }

            // 4f: synthesize a visible reply if the model answered with
            // neither text nor a tool call right after a tool response.
            if calls.is_empty() && text.is_empty() {
                if let Some(synth) = synthesize_from_prior_tool_response(&conversation) {
                    let _ = tx.send(OrchestratorEvent::TextDelta(synth.clone())).await;
                    model_response_parts.push(Part::Text(synth));
                }
            }

            // 4g: no tool calls, done.
            if calls.is_empty() {
                if !model_response_parts.is_empty() {
                    conversation.push(Message::new(Role::Assistant, model_response_parts));
                }
                let _ = tx
                    .send(OrchestratorEvent::TokenUsage { input: usage.0, output: usage.1, cache_read: usage.2 })
                    .await;
                let _ = tx.send(OrchestratorEvent::Done).await;
                return Ok(());
            }

            // 4h: dispatch tool calls and loop.
            conversation.push(Message::new(Role::Assistant, model_response_parts));
            for call in &calls {
                let _ = tx.send(OrchestratorEvent::ToolCallStarted(call.clone())).await;
            }
            let outputs = self.dispatcher.dispatch_batch(&calls, &ctx).await;
            let mut response_parts = Vec::with_capacity(outputs.len());
            for (call, output) in calls.iter().zip(outputs.iter()) {
                let _ = tx
                    .send(OrchestratorEvent::ToolCallFinished {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        output: output.content.clone(),
                        is_error: output.is_error,
                    })
                    .await;
                let payload = serde_json::from_str::<serde_json::Value>(&output.content)
                    .unwrap_or_else(|_| serde_json::json!({ "content": output.content }));
                response_parts.push(Part::ToolResponse { name: call.name.clone(), payload });
            }
            conversation.push(Message::new(Role::Tool, response_parts));
        }
    }

    /// Step 1: profile matching, text overrides, and `*_path=` directive
    /// expansion over every user message. Returns the shaped conversation
    /// plus the (possibly redirected) project root.
    fn shape(&self, mut messages: Vec<Message>, mut project_root: PathBuf, max_code_injection_bytes: usize) -> (Conversation, PathBuf) {
        let prompt_text = concatenated_user_text_raw(&messages);
        let profile = match_profile(&self.profiles, &prompt_text);
        let mut synthesized_system = None;

        for msg in messages.iter_mut() {
            if msg.role != Role::User {
                continue;
            }
            let mut expanded = Vec::with_capacity(msg.parts.len());
            for part in msg.parts.drain(..) {
                let Part::Text(text) = part else {
                    expanded.push(part);
                    continue;
                };
                let text = match profile {
                    Some(p) => apply_text_overrides(&text, p),
                    None => text,
                };
                let result = expand_directives(&text, &project_root, max_code_injection_bytes);
                if let Some(root) = result.project_root {
                    project_root = root;
                }
                if let Some(sys) = result.synthesized_system {
                    synthesized_system = Some(sys);
                }
                if result.parts.is_empty() {
                    expanded.push(Part::Text(text));
                } else {
                    expanded.extend(result.parts);
                }
            }
            msg.parts = expanded;
        }

        if let Some(sys_text) = synthesized_system {
            messages.insert(0, Message::text(Role::System, sys_text));
        }

        (Conversation::from_messages(messages), project_root)
    }

    /// Step 4b: the full catalog filtered by the active profile, or by a
    /// keyword scan of the prompt when no profile narrows the set.
    async fn select_declarations(&self, profile: Option<&PromptProfile>, prompt_text: &str) -> Vec<ToolDeclaration> {
        if profile.map(|p| p.disable_tools).unwrap_or(false) {
            return Vec::new();
        }
        let all = self.dispatcher.declarations().await;

        let mut selected = match profile.map(|p| &p.selected_tools) {
            Some(SelectedTools::Named(names)) => {
                all.into_iter().filter(|d| names.iter().any(|n| n == &d.name)).collect::<Vec<_>>()
            }
            _ => {
                let lower = prompt_text.to_lowercase();
                all.into_iter().filter(|d| lower.contains(&d.name.to_lowercase())).collect::<Vec<_>>()
            }
        };
        selected.truncate(self.upstream_cfg.max_tool_declarations);
        selected
    }

    /// Step 4c: obtain a cached-context handle when the system instruction
    /// is large enough to be worth caching upstream.
    async fn maybe_cache_context(&self, model: &str, conversation: &Conversation) -> anyhow::Result<Option<String>> {
        let Some(system) = conversation.system_instruction() else {
            return Ok(None);
        };
        let text = system.text_content();
        if text.len() / 4 < self.upstream_cfg.min_context_caching_tokens {
            return Ok(None);
        }
        let ttl = Duration::from_secs(self.upstream_cfg.cached_context_ttl_secs);
        let handle = self.context_cache.get_or_create(self.upstream.as_ref(), model, &text, ttl).await?;
        Ok(Some(handle))
    }
}

fn concatenated_user_text_raw(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(Message::text_content)
        .collect::<Vec<_>>()
        .join(" ")
}

fn concatenated_user_text(conversation: &Conversation) -> String {
    concatenated_user_text_raw(&conversation.messages)
}

fn last_user_text(conversation: &Conversation) -> String {
    conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(Message::text_content)
        .unwrap_or_else(|| conversation.last_text())
}

/// §4.1 step f: builds a short visible reply out of the tool response that
/// immediately preceded this (otherwise silent) model turn.
fn synthesize_from_prior_tool_response(conversation: &Conversation) -> Option<String> {
    let last = conversation.messages.last()?;
    if last.role != Role::Tool {
        return None;
    }
    let pieces: Vec<String> = last
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolResponse { name, payload } => Some(format!("{name}: {payload}")),
            _ => None,
        })
        .collect();
    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_model::MockUpstream;
    use relaygate_tools::BuiltinTools;
    use std::collections::HashMap;

    async fn orchestrator(upstream: Arc<dyn Upstream>) -> Orchestrator {
        let pool = Arc::new(relaygate_mcp::ToolServerPool::new());
        pool.reload(HashMap::new(), &BuiltinTools::standard()).await;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(BuiltinTools::standard()),
            pool,
            Arc::new(crate::cache::ToolOutputCache::new()),
        ));
        Orchestrator::new(
            upstream,
            dispatcher,
            Arc::new(ContextCache::new()),
            Vec::new(),
            UpstreamConfig::default(),
            ContextConfig::default(),
        )
    }

    async fn run_to_events(o: &Orchestrator, messages: Vec<Message>) -> Vec<OrchestratorEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let dir = tempfile::tempdir().unwrap();
        o.run("test-model", messages, dir.path().to_path_buf(), Vec::new(), 1024, tx, cancel_rx).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn simple_text_reply_emits_delta_then_done() {
        let upstream: Arc<dyn Upstream> = Arc::new(MockUpstream::always_text("hello there"));
        let o = orchestrator(upstream).await;
        let events = run_to_events(&o, vec![Message::text(Role::User, "hi")]).await;
        assert!(matches!(events.last(), Some(OrchestratorEvent::Done)));
        assert!(events.iter().any(|e| matches!(e, OrchestratorEvent::TextDelta(t) if t == "hello there")));
    }

    #[tokio::test]
    async fn tool_call_round_dispatches_and_continues_to_final_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "file contents").unwrap();
        let upstream: Arc<dyn Upstream> =
            Arc::new(MockUpstream::tool_then_text("read_file", serde_json::json!({"path": "a.txt"}), "done reading"));
        let o = orchestrator(upstream).await;

        let (tx, mut rx) = mpsc::channel(64);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        o.run("test-model", vec![Message::text(Role::User, "read a.txt")], dir.path().to_path_buf(), Vec::new(), 1024, tx, cancel_rx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert!(events.iter().any(|e| matches!(e, OrchestratorEvent::ToolCallStarted(c) if c.name == "read_file")));
        assert!(events.iter().any(|e| matches!(e, OrchestratorEvent::ToolCallFinished{tool_name, is_error, ..} if tool_name == "read_file" && !is_error)));
        assert!(events.iter().any(|e| matches!(e, OrchestratorEvent::TextDelta(t) if t == "done reading")));
        assert!(matches!(events.last(), Some(OrchestratorEvent::Done)));
    }

    #[tokio::test]
    async fn already_cancelled_receiver_yields_immediate_done_with_no_text() {
        let upstream: Arc<dyn Upstream> = Arc::new(MockUpstream::always_text("should not appear"));
        let o = orchestrator(upstream).await;
        let (tx, mut rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        drop(cancel_tx);
        let dir = tempfile::tempdir().unwrap();
        o.run("test-model", vec![Message::text(Role::User, "hi")], dir.path().to_path_buf(), Vec::new(), 1024, tx, cancel_rx)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], OrchestratorEvent::Done));
    }

    #[tokio::test]
    async fn disable_tools_profile_advertises_nothing() {
        let upstream: Arc<dyn Upstream> = Arc::new(MockUpstream::always_text("ok"));
        let mut o = orchestrator(upstream).await;
        o.profiles = vec![PromptProfile {
            name: "quiet".into(),
            triggers: vec!["no tools".into()],
            disable_tools: true,
            ..Default::default()
        }];
        let declarations = o.select_declarations(Some(&o.profiles[0]), "no tools please").await;
        assert!(declarations.is_empty());
    }

    #[tokio::test]
    async fn keyword_scan_advertises_only_matching_tools() {
        let upstream: Arc<dyn Upstream> = Arc::new(MockUpstream::always_text("ok"));
        let o = orchestrator(upstream).await;
        let declarations = o.select_declarations(None, "please grep the logs for errors").await;
        assert!(declarations.iter().any(|d| d.name == "grep"));
        assert!(!declarations.iter().any(|d| d.name == "shell"));
    }

    #[tokio::test]
    async fn named_selected_tools_profile_narrows_advertising() {
        let upstream: Arc<dyn Upstream> = Arc::new(MockUpstream::always_text("ok"));
        let o = orchestrator(upstream).await;
        let profile = PromptProfile {
            name: "narrow".into(),
            triggers: vec!["x".into()],
            selected_tools: SelectedTools::Named(vec!["read_file".into()]),
            ..Default::default()
        };
        let declarations = o.select_declarations(Some(&profile), "anything").await;
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].name, "read_file");
    }

    #[tokio::test]
    async fn small_system_instruction_is_not_cached() {
        let upstream = Arc::new(MockUpstream::always_text("ok"));
        let o = orchestrator(upstream.clone()).await;
        let conv = Conversation::from_messages(vec![
            Message::text(Role::System, "be terse"),
            Message::text(Role::User, "hi"),
        ]);
        let handle = o.maybe_cache_context("test-model", &conv).await.unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn large_system_instruction_is_cached() {
        let upstream = Arc::new(MockUpstream::always_text("ok"));
        let mut o = orchestrator(upstream.clone()).await;
        o.upstream_cfg.min_context_caching_tokens = 10;
        let conv = Conversation::from_messages(vec![
            Message::text(Role::System, "x".repeat(1000)),
            Message::text(Role::User, "hi"),
        ]);
        let handle = o.maybe_cache_context("test-model", &conv).await.unwrap();
        assert!(handle.is_some());
    }
}
