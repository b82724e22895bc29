// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool dispatcher (§4.2): resolves a single tool call against the built-in
//! set or an external tool-server, consults the tool-output cache, and
//! shrinks oversized results through the output optimizer before they
//! re-enter the conversation.
//!
//! Batches of calls requested in the same model turn dispatch concurrently
//! *unless* any call in the batch targets a mutating tool, in which case the
//! whole batch runs sequentially in request order (§4.2) — a write racing a
//! read of the same file inside one turn must not reorder.
use std::sync::Arc;

use futures::future::join_all;
use relaygate_mcp::ToolServerPool;
use relaygate_tools::{BuiltinTools, OutputCategory, RequestContext, ToolCall, ToolOutput};

use relaygate_model::ToolDeclaration;

use crate::cache::ToolOutputCache;
use crate::output_optimizer;

/// Everything the dispatcher needs to resolve and execute a call. Held by
/// the orchestrator for the lifetime of one request.
pub struct Dispatcher {
    pub builtin: Arc<BuiltinTools>,
    pub external: Arc<ToolServerPool>,
    pub cache: Arc<ToolOutputCache>,
}

impl Dispatcher {
    pub fn new(builtin: Arc<BuiltinTools>, external: Arc<ToolServerPool>, cache: Arc<ToolOutputCache>) -> Self {
        Self { builtin, external, cache }
    }

    /// Whether `name` is owned by a mutating built-in. External tools have
    /// no declared mutation flag (§4.2.1 only carries name/description/
    /// schema over the wire) so they're treated as mutating: a batch
    /// containing an external call always serializes, the conservative
    /// choice when the proxy can't prove the call is side-effect free.
    async fn is_mutating(&self, name: &str) -> bool {
        if self.builtin.get(name).is_some() {
            return self.builtin.is_mutating(name);
        }
        true
    }

    /// The full tool catalog (built-ins ∪ external servers) available to
    /// advertise to the upstream this request — `ToolServerPool::reload`
    /// always seeds its registry from the built-in set, so this alone is
    /// the complete advertisable set.
    pub async fn declarations(&self) -> Vec<ToolDeclaration> {
        self.external.declarations().await
    }

    fn output_category(&self, name: &str) -> OutputCategory {
        self.builtin.get(name).map(|t| t.output_category()).unwrap_or_default()
    }

    /// Whether a result for `name` is eligible for the tool-output cache.
    /// Mutating tools are never cached — a second identical call must
    /// re-execute, since its result may depend on state the first call
    /// just changed.
    async fn is_cacheable(&self, name: &str) -> bool {
        !self.is_mutating(name).await
    }

    /// Dispatches one call end to end: cache lookup, routing, optimizer,
    /// cache insert. Never panics; tool failures come back as an
    /// error-flagged [`ToolOutput`].
    pub async fn dispatch_one(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let cacheable = self.is_cacheable(&call.name).await;
        if cacheable {
            if let Some(cached) = self.cache.get(&call.name, &call.args).await {
                return ToolOutput::ok(&call.id, cached);
            }
        }

        let mut output = self.route(call, ctx).await;
        if !output.is_error {
            output.content = output_optimizer::optimize(&output.content, self.output_category(&call.name));
            if cacheable {
                self.cache.insert(&call.name, &call.args, output.content.clone()).await;
            }
        }
        output
    }

    /// Built-ins always win; external servers only see names the built-in
    /// set doesn't own (mirrors `ToolServerPool::call`'s own built-in
    /// rejection, checked here first so we never round-trip a built-in
    /// name through the external pool).
    async fn route(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        if self.builtin.get(&call.name).is_some() {
            return self.builtin.execute(call, ctx).await;
        }
        match self.external.call(&call.name, call.args.clone()).await {
            Ok(value) => ToolOutput::ok(&call.id, value.to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }

    /// Dispatches a full batch per the §4.2 parallelism rule: concurrent
    /// unless any call in the batch is mutating, in which case every call
    /// (including the non-mutating ones) runs sequentially in order.
    pub async fn dispatch_batch(&self, calls: &[ToolCall], ctx: &RequestContext) -> Vec<ToolOutput> {
        let mut any_mutating = false;
        for call in calls {
            if self.is_mutating(&call.name).await {
                any_mutating = true;
                break;
            }
        }

        if any_mutating {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.dispatch_one(call, ctx).await);
            }
            results
        } else {
            join_all(calls.iter().map(|call| self.dispatch_one(call, ctx))).await
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
