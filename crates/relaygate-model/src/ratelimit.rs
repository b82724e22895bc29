// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sliding-window call limiter.
//!
//! Maintains a queue of recent call timestamps and sleeps until the oldest
//! one ages out of the window when the queue is full, rather than a
//! token-bucket/GCRA rate: GCRA smooths bursts differently than a literal
//! sliding window and would change observable timing behavior.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Block until a new call is permitted under the window, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut q = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = q.front() {
                    if now.duration_since(oldest) >= self.window {
                        q.pop_front();
                    } else {
                        break;
                    }
                }
                if q.len() < self.max_calls {
                    q.push_back(now);
                    None
                } else {
                    let oldest = *q.front().expect("len >= max_calls > 0");
                    Some(self.window - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
