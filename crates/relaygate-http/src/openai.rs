// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible wire types (§6) and conversion to/from the proxy's
//! internal [`relaygate_model`] data model.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use relaygate_model::{Message, Part, Role};

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InlineData { source: InlineSource },
}

#[derive(Debug, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct InlineSource {
    pub media_type: String,
    pub data: String,
}

/// Parses a client's `messages` array into the internal `Message` sequence
/// `relaygate_core::Orchestrator::run` expects.
///
/// Remote (non-`data:`) `image_url` values are not fetched — this proxy has
/// no outbound content-fetcher component (§4 names none) — and are instead
/// carried through as a text marker so the model at least sees that an
/// image was referenced, rather than silently dropping the part.
pub fn into_messages(messages: Vec<ChatMessage>) -> anyhow::Result<Vec<Message>> {
    messages.into_iter().map(into_message).collect()
}

fn into_message(msg: ChatMessage) -> anyhow::Result<Message> {
    let role = parse_role(&msg.role)?;
    let parts = match msg.content {
        MessageContent::Text(text) => vec![Part::Text(text)],
        MessageContent::Parts(parts) => parts.into_iter().map(into_part).collect::<anyhow::Result<Vec<_>>>()?,
    };
    Ok(Message::new(role, parts))
}

fn parse_role(role: &str) -> anyhow::Result<Role> {
    match role {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => anyhow::bail!("unknown message role {other:?}"),
    }
}

fn into_part(part: ContentPart) -> anyhow::Result<Part> {
    match part {
        ContentPart::Text { text } => Ok(Part::Text(text)),
        ContentPart::ImageUrl { image_url } => match parse_data_uri(&image_url.url)? {
            Some((mime, bytes)) => Ok(Part::InlineBlob { mime, bytes }),
            None => Ok(Part::Text(format!("[image: {}]", image_url.url))),
        },
        ContentPart::InlineData { source } => {
            let bytes = BASE64
                .decode(source.data.as_bytes())
                .map_err(|e| anyhow::anyhow!("invalid base64 inline_data: {e}"))?;
            Ok(Part::InlineBlob { mime: source.media_type, bytes })
        }
    }
}

/// Decodes a `data:<mime>;base64,<payload>` URI. Returns `Ok(None)` for any
/// URL that isn't a `data:` URI (a web URL this proxy does not fetch).
fn parse_data_uri(url: &str) -> anyhow::Result<Option<(String, Vec<u8>)>> {
    let Some(rest) = url.strip_prefix("data:") else {
        return Ok(None);
    };
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("malformed data URI: missing comma"))?;
    let mime = header.strip_suffix(";base64").unwrap_or(header).to_string();
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid base64 data URI: {e}"))?;
    Ok(Some((mime, bytes)))
}

// ─── Response chunks (§6) ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

pub fn chunk(id: &str, created: i64, model: &str, content: Option<String>, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice { index: 0, delta: ChunkDelta { content }, finish_reason }],
    }
}

// ─── GET /v1/models (§6) ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_content_becomes_single_text_part() {
        let messages = vec![ChatMessage { role: "user".into(), content: MessageContent::Text("hi".into()) }];
        let out = into_messages(messages).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].parts, vec![Part::Text("hi".into())]);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let messages = vec![ChatMessage { role: "operator".into(), content: MessageContent::Text("hi".into()) }];
        assert!(into_messages(messages).is_err());
    }

    #[test]
    fn data_uri_image_decodes_to_inline_blob() {
        let b64 = BASE64.encode(b"fake-png-bytes");
        let url = format!("data:image/png;base64,{b64}");
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![ContentPart::ImageUrl { image_url: ImageUrl { url } }]),
        }];
        let out = into_messages(messages).unwrap();
        match &out[0].parts[0] {
            Part::InlineBlob { mime, bytes } => {
                assert_eq!(mime, "image/png");
                assert_eq!(bytes, b"fake-png-bytes");
            }
            other => panic!("expected InlineBlob, got {other:?}"),
        }
    }

    #[test]
    fn remote_image_url_becomes_text_marker() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl { url: "https://example.test/pic.png".into() },
            }]),
        }];
        let out = into_messages(messages).unwrap();
        assert!(matches!(&out[0].parts[0], Part::Text(t) if t.contains("https://example.test/pic.png")));
    }

    #[test]
    fn inline_data_part_decodes_base64() {
        let b64 = BASE64.encode(b"pdf-bytes");
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![ContentPart::InlineData {
                source: InlineSource { media_type: "application/pdf".into(), data: b64 },
            }]),
        }];
        let out = into_messages(messages).unwrap();
        match &out[0].parts[0] {
            Part::InlineBlob { mime, bytes } => {
                assert_eq!(mime, "application/pdf");
                assert_eq!(bytes, b"pdf-bytes");
            }
            other => panic!("expected InlineBlob, got {other:?}"),
        }
    }

    #[test]
    fn mixed_text_and_image_parts_preserve_order() {
        let b64 = BASE64.encode(b"x");
        let url = format!("data:image/png;base64,{b64}");
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "look at this:".into() },
                ContentPart::ImageUrl { image_url: ImageUrl { url } },
            ]),
        }];
        let out = into_messages(messages).unwrap();
        assert_eq!(out[0].parts.len(), 2);
        assert!(matches!(&out[0].parts[0], Part::Text(t) if t == "look at this:"));
        assert!(matches!(&out[0].parts[1], Part::InlineBlob { .. }));
    }

    #[test]
    fn chunk_helper_builds_expected_shape() {
        let c = chunk("id1", 1000, "flash", Some("hi".into()), None);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "hi");
        assert!(json["choices"][0]["finish_reason"].is_null());
    }
}
