// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Proxy-internal conversation data model.
//!
//! `Part` is a tagged variant rather than the duck-typed dict the source
//! passed around, per the redesign flag on "duck-typed parts". Wire
//! encode/decode to the upstream schema lives in [`crate::upstream`], never
//! inline in `serde` derives here, so the internal model stays independent
//! of any one upstream's field names.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single part of a message's ordered content sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    /// Inline binary blob (image/pdf/audio), base64-decoded bytes plus MIME type.
    InlineBlob { mime: String, bytes: Vec<u8> },
    /// A tool call the model requested mid-generation.
    ToolCall {
        name: String,
        args: serde_json::Value,
    },
    /// A tool's response to a prior `ToolCall`.
    ToolResponse {
        name: String,
        payload: serde_json::Value,
    },
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Part::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// One turn in the conversation: a role plus an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenation of all `Text` parts, joined by newline. Empty string if
    /// the message carries no text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Collapse consecutive `Text` parts within this message by newline-join
    /// (data-model invariant (c)).
    pub fn collapse_text_parts(&mut self) {
        let mut collapsed: Vec<Part> = Vec::with_capacity(self.parts.len());
        for part in self.parts.drain(..) {
            match (collapsed.last_mut(), &part) {
                (Some(Part::Text(prev)), Part::Text(next)) => {
                    prev.push('\n');
                    prev.push_str(next);
                }
                _ => collapsed.push(part),
            }
        }
        self.parts = collapsed;
    }
}

/// An ordered sequence of [`Message`]s with the merge invariants from the
/// data model applied on push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut c = Self { messages };
        c.normalize();
        c
    }

    /// Append a message, merging it into the previous one if the roles match
    /// (invariant (b)), then collapsing consecutive text parts (invariant
    /// (c)).
    pub fn push(&mut self, mut message: Message) {
        message.collapse_text_parts();
        if let Some(last) = self.messages.last_mut() {
            if last.role == message.role {
                last.parts.append(&mut message.parts);
                last.collapse_text_parts();
                return;
            }
        }
        self.messages.push(message);
    }

    /// Re-derive the merge invariants over the whole sequence. Used when a
    /// `Conversation` is built from a raw `Vec<Message>` (e.g. deserialized
    /// from the client request) rather than incrementally via [`Self::push`].
    pub fn normalize(&mut self) {
        let raw = std::mem::take(&mut self.messages);
        for m in raw {
            self.push(m);
        }
    }

    pub fn system_instruction(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    /// The most recent message's concatenated text, used as `current_query`
    /// in the context-windowing algorithm (§4.4.3).
    pub fn last_text(&self) -> String {
        self.messages
            .last()
            .map(Message::text_content)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// `{name, description, parameter_schema}` advertised to the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
}

/// Events produced while streaming the upstream's response body (§4.1e).
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    TextDelta(String),
    ToolCall {
        name: String,
        args: serde_json::Value,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
    },
    /// The upstream body carried an explicit error object.
    Error(String),
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
