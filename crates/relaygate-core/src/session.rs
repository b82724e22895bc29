// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory conversation session (§3): the message list a single request's
//! orchestrator loop accumulates and windows against a token budget.
use relaygate_model::{Message, Part};
use uuid::Uuid;

/// `TokenCounter` heuristic (§3): `len(text) / 4`, used only for budgeting
/// and truncation decisions, never for billing.
pub fn approx_tokens(msg: &Message) -> usize {
    msg.parts.iter().map(part_tokens).sum()
}

fn part_tokens(part: &Part) -> usize {
    match part {
        Part::Text(t) => t.len() / 4,
        Part::InlineBlob { bytes, .. } => bytes.len() / 4,
        Part::ToolCall { name, args } => (name.len() + args.to_string().len()) / 4,
        Part::ToolResponse { name, payload } => (name.len() + payload.to_string().len()) / 4,
    }
}

pub fn conversation_tokens(messages: &[Message]) -> usize {
    messages.iter().map(approx_tokens).sum()
}

/// The message list a single request accumulates across tool-loop rounds.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub token_count: usize,
    pub max_tokens: usize,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self { id: Uuid::new_v4().to_string(), messages: Vec::new(), token_count: 0, max_tokens }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += approx_tokens(&msg);
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs {
            self.push(m);
        }
    }

    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    pub fn recalculate_tokens(&mut self) {
        self.token_count = conversation_tokens(&self.messages);
    }

    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
