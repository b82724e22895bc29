// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Argument coercion (§4.2.1): a model's tool call arguments may arrive as
//! a JSON object, a `key=value` string (quoting optional), or a
//! JSON-encoded string. Normalize to a flat object, then re-wrap under an
//! `args`/`kwargs` field if the tool's declared schema expects one.
use serde_json::{Map, Value};

pub fn coerce_arguments(raw: &Value, input_schema: &Value) -> Value {
    let flat = normalize(raw);
    rewrap(flat, input_schema)
}

fn normalize(raw: &Value) -> Value {
    match raw {
        Value::Object(_) => raw.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                if parsed.is_object() {
                    return parsed;
                }
            }
            parse_key_value_pairs(trimmed)
        }
        other => other.clone(),
    }
}

/// Parses a `key=value, key2="quoted value"` string into a flat JSON
/// object. Values are kept as strings; callers needing numeric/bool
/// coercion do it against the declared schema downstream.
fn parse_key_value_pairs(s: &str) -> Value {
    let mut map = Map::new();
    for pair in split_pairs(s) {
        if let Some((k, v)) = pair.split_once('=') {
            map.insert(k.trim().to_string(), Value::String(unquote(v.trim())));
        }
    }
    Value::Object(map)
}

/// Splits on commas that aren't inside a quoted value.
fn split_pairs(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';
    for ch in s.chars() {
        match ch {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = ch;
                current.push(ch);
            }
            c if in_quotes && c == quote_char => {
                in_quotes = false;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// If `input_schema` declares a top-level `args` or `kwargs` property,
/// re-wrap the flat object under that key; otherwise pass it through.
fn rewrap(flat: Value, input_schema: &Value) -> Value {
    let Some(properties) = input_schema.get("properties").and_then(Value::as_object) else {
        return flat;
    };
    for wrapper in ["args", "kwargs"] {
        if properties.contains_key(wrapper) {
            let mut map = Map::new();
            map.insert(wrapper.to_string(), flat);
            return Value::Object(map);
        }
    }
    flat
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
