// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire translation to and from the upstream generative-model protocol.
//!
//! Request shape (`contents`, `systemInstruction`, `tools`) and response
//! shape (`candidates[0].content.parts`, `usageMetadata`) field names match
//! the upstream's documented schema. The streaming decoder is custom: the
//! upstream body is a bare concatenation of whitespace-delimited JSON
//! objects (§4.1e), not SSE `data:` lines, so [`IncrementalJsonReader`]
//! parses incrementally instead of splitting on lines.
use base64::Engine;
use serde_json::{json, Value};

use crate::types::{Conversation, Message, Part, Role, ResponseEvent, ToolDeclaration};

/// Build the JSON body sent to the upstream `generateContent` endpoint.
///
/// The source system instruction (conversation invariant: only ever the
/// first message) is pulled out into its own `systemInstruction` field;
/// every other message becomes a `contents` entry with its role translated
/// (`Assistant` -> `"model"`, `Tool` -> `"tool"`, `User` -> `"user"`).
pub fn build_request(
    conversation: &Conversation,
    tools: &[ToolDeclaration],
    cached_content: Option<&str>,
) -> Value {
    let mut body = serde_json::Map::new();

    let mut messages = conversation.messages.as_slice();
    if let Some(sys) = conversation.system_instruction() {
        body.insert(
            "systemInstruction".into(),
            json!({ "parts": [{ "text": sys.text_content() }] }),
        );
        messages = &messages[1..];
    }

    let contents: Vec<Value> = messages.iter().map(message_to_content).collect();
    body.insert("contents".into(), Value::Array(contents));

    if !tools.is_empty() {
        let decls: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameter_schema,
                })
            })
            .collect();
        body.insert(
            "tools".into(),
            Value::Array(vec![json!({ "functionDeclarations": decls })]),
        );
    }

    if let Some(handle) = cached_content {
        body.insert("cachedContent".into(), Value::String(handle.to_string()));
    }

    Value::Object(body)
}

fn message_to_content(m: &Message) -> Value {
    let role = match m.role {
        Role::Assistant => "model",
        Role::Tool => "tool",
        Role::User | Role::System => "user",
    };
    let parts: Vec<Value> = m.parts.iter().map(part_to_wire).collect();
    json!({ "role": role, "parts": parts })
}

fn part_to_wire(p: &Part) -> Value {
    match p {
        Part::Text(t) => json!({ "text": t }),
        Part::InlineBlob { mime, bytes } => {
            let data = base64::engine::general_purpose::STANDARD.encode(bytes);
            json!({ "inlineData": { "mimeType": mime, "data": data } })
        }
        Part::ToolCall { name, args } => json!({ "functionCall": { "name": name, "args": args } }),
        Part::ToolResponse { name, payload } => {
            json!({ "functionResponse": { "name": name, "response": payload } })
        }
    }
}

/// Decode one streamed upstream JSON object into zero or more proxy-internal
/// events. A single object may carry both text/tool-call parts and usage
/// metadata, so every applicable field is inspected rather than returning on
/// the first match (unlike `google.rs`'s `parse_gemini_chunk`, which stops at
/// the first part kind it recognizes).
pub fn parse_response_object(v: &Value) -> Result<Vec<ResponseEvent>, String> {
    let mut events = Vec::new();

    if let Some(err) = v.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream error")
            .to_string();
        events.push(ResponseEvent::Error(msg));
        return Ok(events);
    }

    if let Some(candidate) = v.get("candidates").and_then(|c| c.get(0)) {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    events.push(ResponseEvent::TextDelta(text.to_string()));
                } else if let Some(call) = part.get("functionCall") {
                    let name = call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let args = call.get("args").cloned().unwrap_or(Value::Null);
                    events.push(ResponseEvent::ToolCall { name, args });
                }
            }
        }
    }

    if let Some(usage) = v.get("usageMetadata") {
        let as_u32 = |k: &str| usage.get(k).and_then(Value::as_u64).unwrap_or(0) as u32;
        events.push(ResponseEvent::Usage {
            input_tokens: as_u32("promptTokenCount"),
            output_tokens: as_u32("candidatesTokenCount"),
            cache_read_tokens: as_u32("cachedContentTokenCount"),
        });
    }

    Ok(events)
}

/// Bound applied to the rolling decode buffer (§4.1e). Runaway input (a
/// malformed upstream, or one that never closes an object) is truncated
/// rather than allowed to grow without limit.
const MAX_BUFFER_BYTES: usize = 64 * 1024;
const TRUNCATE_TO_BYTES: usize = 32 * 1024;

/// Incrementally extracts top-level JSON objects from a byte stream that is
/// "a concatenation of whitespace-delimited JSON objects" rather than a
/// framed protocol like SSE. Bytes before the first `{` of each object are
/// discarded as non-JSON noise (keep-alive whitespace, stray newlines).
#[derive(Default)]
pub struct IncrementalJsonReader {
    buf: Vec<u8>,
}

impl IncrementalJsonReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a newly-received chunk and return every complete object decoded
    /// from the buffer so far (may be empty, may be more than one).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Value, String>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(result) = self.try_decode_one() {
            out.push(result);
        }
        if !self.buf.contains(&b'{') {
            self.buf.clear();
        } else if self.buf.len() > MAX_BUFFER_BYTES {
            let drop_to = self.buf.len() - TRUNCATE_TO_BYTES;
            self.buf.drain(..drop_to);
        }
        out
    }

    fn try_decode_one(&mut self) -> Option<Result<Value, String>> {
        let start = self.buf.iter().position(|&b| b == b'{')?;
        if start > 0 {
            self.buf.drain(..start);
        }
        let text = std::str::from_utf8(&self.buf).ok()?;
        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
        match stream.next()? {
            Ok(value) => {
                let consumed = stream.byte_offset();
                self.buf.drain(..consumed);
                Some(Ok(value))
            }
            Err(e) if e.is_eof() => None,
            Err(e) => {
                // Drop the offending brace so the next feed can resync
                // instead of looping forever on the same malformed prefix.
                self.buf.drain(..1);
                Some(Err(e.to_string()))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn build_request_splits_system_instruction_out_of_contents() {
        let conv = Conversation::from_messages(vec![
            Message::text(Role::System, "be terse"),
            Message::text(Role::User, "hi"),
        ]);
        let body = build_request(&conv, &[], None);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "be terse"
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn build_request_maps_assistant_and_tool_roles() {
        let conv = Conversation::from_messages(vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "hello"),
            Message::new(
                Role::Tool,
                vec![Part::ToolResponse {
                    name: "read_file".into(),
                    payload: json!({"ok": true}),
                }],
            ),
        ]);
        let body = build_request(&conv, &[], None);
        let roles: Vec<&str> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "tool"]);
    }

    #[test]
    fn build_request_includes_cached_content_handle() {
        let conv = Conversation::from_messages(vec![Message::text(Role::User, "hi")]);
        let body = build_request(&conv, &[], Some("cachedContents/abc123"));
        assert_eq!(body["cachedContent"], "cachedContents/abc123");
    }

    #[test]
    fn parse_response_object_handles_text_and_tool_call_in_one_candidate() {
        let v = json!({
            "candidates": [{
                "content": { "parts": [
                    {"text": "thinking..."},
                    {"functionCall": {"name": "read_file", "args": {"path": "a.rs"}}}
                ]}
            }]
        });
        let events = parse_response_object(&v).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ResponseEvent::TextDelta(t) if t == "thinking..."));
        assert!(matches!(&events[1], ResponseEvent::ToolCall { name, .. } if name == "read_file"));
    }

    #[test]
    fn parse_response_object_surfaces_usage_alongside_text() {
        let v = json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}],
            "usageMetadata": {
                "promptTokenCount": 10,
                "candidatesTokenCount": 5,
                "cachedContentTokenCount": 2
            }
        });
        let events = parse_response_object(&v).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            ResponseEvent::Usage { input_tokens: 10, output_tokens: 5, cache_read_tokens: 2 }
        ));
    }

    #[test]
    fn parse_response_object_surfaces_error() {
        let v = json!({ "error": { "message": "quota exceeded" } });
        let events = parse_response_object(&v).unwrap();
        assert!(matches!(&events[0], ResponseEvent::Error(m) if m == "quota exceeded"));
    }

    #[test]
    fn reader_decodes_object_split_across_two_chunks() {
        let mut r = IncrementalJsonReader::new();
        assert!(r.feed(br#"{"candidates":[{"content":"#).is_empty());
        let out = r.feed(br#"{"parts":[{"text":"hi"}]}}]}"#);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }

    #[test]
    fn reader_decodes_back_to_back_objects_in_one_chunk() {
        let mut r = IncrementalJsonReader::new();
        let out = r.feed(br#"{"a":1} {"b":2}"#);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap()["a"], 1);
        assert_eq!(out[1].as_ref().unwrap()["b"], 2);
    }

    #[test]
    fn reader_skips_leading_non_json_noise() {
        let mut r = IncrementalJsonReader::new();
        let out = r.feed(b"\n\n  {\"a\":1}");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap()["a"], 1);
    }

    #[test]
    fn reader_discards_buffer_with_no_object_start() {
        let mut r = IncrementalJsonReader::new();
        let garbage = vec![b'x'; MAX_BUFFER_BYTES + 1024];
        assert!(r.feed(&garbage).is_empty());
        assert!(r.buf.is_empty());
    }

    #[test]
    fn reader_truncates_head_of_an_unclosed_object_that_outgrows_the_cap() {
        let mut r = IncrementalJsonReader::new();
        // An opening brace followed by an unterminated string that keeps
        // growing: never a complete value, so it must not retain the whole
        // history once it exceeds the cap.
        let mut opener = vec![b'{', b'"', b'a', b'"', b':', b'"'];
        opener.extend(vec![b'y'; MAX_BUFFER_BYTES + 4096]);
        let out = r.feed(&opener);
        assert!(out.is_empty());
        assert!(r.buf.len() <= TRUNCATE_TO_BYTES);
    }
}
