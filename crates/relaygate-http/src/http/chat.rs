// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `POST /v1/chat/completions` (§6): translates one client request into an
//! [`relaygate_core::Orchestrator::run`] call and folds the resulting
//! [`OrchestratorEvent`] stream into OpenAI-shaped SSE chunks.
use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use relaygate_core::OrchestratorEvent;

use crate::error::{bad_request, credential_missing};
use crate::openai::{self, ChatCompletionRequest};
use crate::state::AppState;

pub async fn chat_completions(State(state): State<AppState>, Json(req): Json<ChatCompletionRequest>) -> Response {
    let secret = match state.credentials.active_secret() {
        Ok(s) => s,
        Err(_) => return credential_missing(),
    };
    state.upstream_client.set_api_key(secret);

    let messages = match openai::into_messages(req.messages) {
        Ok(m) => m,
        Err(e) => return bad_request(e.to_string()),
    };

    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = now_epoch_secs();
    let model = req.model;

    let (tx, rx) = mpsc::channel::<OrchestratorEvent>(64);
    let (_cancel_tx, cancel_rx) = oneshot::channel();
    let orchestrator = state.orchestrator.clone();
    let project_root = state.project_root.clone();
    let allowed_roots = state.allowed_roots.clone();
    let max_code_injection_bytes = state.max_code_injection_bytes;
    let run_model = model.clone();

    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .run(&run_model, messages, project_root, allowed_roots, max_code_injection_bytes, tx.clone(), cancel_rx)
            .await
        {
            warn!(error = %e, "orchestrator run failed");
            let _ = tx.send(OrchestratorEvent::Error(e.to_string())).await;
            let _ = tx.send(OrchestratorEvent::Done).await;
        }
    });

    Sse::new(event_stream(rx, id, created, model, state.credentials.clone())).into_response()
}

fn now_epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// State machine driving the SSE body: each `TextDelta` becomes a content
/// chunk, `Error`/`Done` becomes exactly one `finish_reason:"stop"` chunk,
/// and the stream always ends with the literal `[DONE]` marker (§6).
/// Events with no client-visible shape (tool call lifecycle, context
/// windowing, usage) are logged and otherwise dropped.
enum StreamState {
    Live { rx: mpsc::Receiver<OrchestratorEvent>, errored: bool },
    PendingDone,
    Finished,
}

fn event_stream(
    rx: mpsc::Receiver<OrchestratorEvent>,
    id: String,
    created: i64,
    model: String,
    credentials: std::sync::Arc<relaygate_config::CredentialStore>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(StreamState::Live { rx, errored: false }, move |state| {
        let id = id.clone();
        let model = model.clone();
        let credentials = credentials.clone();
        async move {
            match state {
                StreamState::Finished => None,
                StreamState::PendingDone => Some((done_event(), StreamState::Finished)),
                StreamState::Live { mut rx, errored } => loop {
                    match rx.recv().await {
                        None => return Some((done_event(), StreamState::Finished)),
                        Some(OrchestratorEvent::TextDelta(text)) => {
                            let c = openai::chunk(&id, created, &model, Some(text), None);
                            return Some((data_event(&c), StreamState::Live { rx, errored }));
                        }
                        Some(OrchestratorEvent::Error(msg)) => {
                            let c = openai::chunk(&id, created, &model, Some(msg), Some("stop"));
                            return Some((data_event(&c), StreamState::Live { rx, errored: true }));
                        }
                        Some(OrchestratorEvent::Done) => {
                            if errored {
                                return Some((done_event(), StreamState::Finished));
                            }
                            let c = openai::chunk(&id, created, &model, None, Some("stop"));
                            return Some((data_event(&c), StreamState::PendingDone));
                        }
                        Some(OrchestratorEvent::TokenUsage { input, output, .. }) => {
                            let date = chrono::Utc::now().date_naive().to_string();
                            if let Err(e) = credentials.record_token_usage(&date, &model, input as u64, output as u64) {
                                warn!(error = %e, "failed to record token usage");
                            }
                            continue;
                        }
                        Some(other) => {
                            debug!(?other, "dropping internal-only orchestrator event from SSE body");
                            continue;
                        }
                    }
                },
            }
        }
    })
}

fn data_event(chunk: &openai::ChatCompletionChunk) -> Result<Event, Infallible> {
    Ok(Event::default().data(serde_json::to_string(chunk).unwrap_or_default()))
}

fn done_event() -> Result<Event, Infallible> {
    Ok(Event::default().data("[DONE]"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    fn test_credentials() -> std::sync::Arc<relaygate_config::CredentialStore> {
        let dir = tempfile::tempdir().unwrap();
        std::sync::Arc::new(relaygate_config::CredentialStore::open(dir.path().join("api_keys.json")).unwrap())
    }

    fn recv_all(rx: mpsc::Receiver<OrchestratorEvent>) -> Vec<Result<Event, Infallible>> {
        let id = "id".to_string();
        let model = "m".to_string();
        futures::executor::block_on(event_stream(rx, id, 0, model, test_credentials()).collect::<Vec<_>>())
    }

    #[test]
    fn plain_completion_ends_with_stop_chunk_then_done() {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(OrchestratorEvent::TextDelta("hi".into())).unwrap();
        tx.try_send(OrchestratorEvent::Done).unwrap();
        drop(tx);
        let events = recv_all(rx);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn error_event_produces_single_stop_chunk_not_two() {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(OrchestratorEvent::Error("boom".into())).unwrap();
        tx.try_send(OrchestratorEvent::Done).unwrap();
        drop(tx);
        let events = recv_all(rx);
        // one error chunk + one [DONE], no duplicate stop chunk from Done.
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn internal_events_are_dropped_from_the_visible_stream() {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(OrchestratorEvent::TokenUsage { input: 1, output: 1, cache_read: 0 }).unwrap();
        tx.try_send(OrchestratorEvent::Done).unwrap();
        drop(tx);
        let events = recv_all(rx);
        assert_eq!(events.len(), 2);
    }
}
