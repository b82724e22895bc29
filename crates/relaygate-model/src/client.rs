// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared upstream HTTP client: connection pooling, sliding-window rate
//! limiting, and retry with jittered exponential backoff (§4.7).
//!
//! Lives in this crate rather than in `relaygate-http` because this is the
//! crate that actually issues the outbound upstream request; putting it in
//! `relaygate-http` (which sits above `relaygate-core`, which sits above
//! this crate) would close a dependency cycle the wrong way.
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt as _;
use rand::Rng;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::ratelimit::SlidingWindowLimiter;
use crate::types::{Conversation, ResponseEvent, ToolDeclaration};
use crate::upstream::{build_request, parse_response_object, IncrementalJsonReader};

const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF_SECS: f64 = 1.0;
const JITTER_MAX_SECS: f64 = 0.5;

/// Abstraction over "talk to the upstream generative-model service", so the
/// orchestrator in `relaygate-core` can run against [`UpstreamClient`] in
/// production and a scripted stand-in ([`crate::mock::MockUpstream`]) in
/// tests without a feature flag.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn stream_generate(
        &self,
        model: &str,
        conversation: &Conversation,
        tools: &[ToolDeclaration],
        cached_content: Option<&str>,
    ) -> anyhow::Result<BoxStream<'static, ResponseEvent>>;

    /// Create a server-side cached context for a system instruction (§4.5).
    /// Returns the opaque cache handle the upstream hands back.
    async fn create_cached_context(
        &self,
        model: &str,
        system_text: &str,
        ttl: Duration,
    ) -> anyhow::Result<String>;
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: std::sync::RwLock<String>,
    limiter: SlidingWindowLimiter,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_rate_limit(base_url, api_key, 30, Duration::from_secs(60))
    }

    pub fn with_rate_limit(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        max_calls: usize,
        window: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(300))
            .build()
            .expect("reqwest client config is static and infallible");
        Self {
            http,
            base_url: base_url.into(),
            api_key: std::sync::RwLock::new(api_key.into()),
            limiter: SlidingWindowLimiter::new(max_calls, window),
        }
    }

    fn api_key(&self) -> String {
        self.api_key.read().unwrap().clone()
    }

    /// Swap the bearer credential used for every subsequent request. The
    /// credential store (§4.8) is the source of truth; callers re-assert it
    /// here per request so a runtime key rotation takes effect immediately
    /// without rebuilding the pooled HTTP client.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        *self.api_key.write().unwrap() = api_key.into();
    }

    /// Issue `builder` with retry/backoff per §4.7, honoring `Retry-After`
    /// on throttling responses and jittered exponential backoff otherwise.
    /// Only covers the request-send + header stage; once a 2xx response
    /// begins streaming, errors mid-body are surfaced as a stream event
    /// instead (the client may already have forwarded partial text).
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> anyhow::Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            let outcome = build().send().await;
            match outcome {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if is_retryable_status(resp.status()) && attempt < MAX_RETRIES => {
                    let wait = retry_after(&resp).unwrap_or_else(|| backoff_duration(attempt));
                    attempt += 1;
                    tokio::time::sleep(wait).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("upstream returned {status}: {body}");
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < MAX_RETRIES => {
                    let wait = backoff_duration(attempt);
                    attempt += 1;
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// `1.0 * 2^attempt + uniform(0, 0.5)` seconds.
fn backoff_duration(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF_SECS * 2f64.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..JITTER_MAX_SECS);
    Duration::from_secs_f64(exp + jitter)
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn stream_generate(
        &self,
        model: &str,
        conversation: &Conversation,
        tools: &[ToolDeclaration],
        cached_content: Option<&str>,
    ) -> anyhow::Result<BoxStream<'static, ResponseEvent>> {
        let body = build_request(conversation, tools, cached_content);
        let url = format!("{}/models/{model}:streamGenerateContent", self.base_url);
        let api_key = self.api_key();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&body)
            })
            .await?;

        let (tx, rx) = mpsc::channel::<ResponseEvent>(64);
        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut reader = IncrementalJsonReader::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(ResponseEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                for decoded in reader.feed(&chunk) {
                    match decoded {
                        Ok(value) => match parse_response_object(&value) {
                            Ok(events) => {
                                let mut terminate = false;
                                for ev in events {
                                    terminate |= matches!(ev, ResponseEvent::Error(_));
                                    if tx.send(ev).await.is_err() {
                                        return;
                                    }
                                }
                                if terminate {
                                    return;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(ResponseEvent::Error(e)).await;
                                return;
                            }
                        },
                        Err(e) => {
                            let _ = tx.send(ResponseEvent::Error(e)).await;
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(ResponseEvent::Done).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn create_cached_context(
        &self,
        model: &str,
        system_text: &str,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        let url = format!("{}/cachedContents", self.base_url);
        let api_key = self.api_key();
        let body = serde_json::json!({
            "model": format!("models/{model}"),
            "systemInstruction": { "parts": [{ "text": system_text }] },
            "ttl": format!("{}s", ttl.as_secs()),
        });
        let resp = self
            .send_with_retry(|| self.http.post(&url).bearer_auth(&api_key).json(&body))
            .await?;
        let parsed: serde_json::Value = resp.json().await?;
        parsed
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("cached-context response missing `name`"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
