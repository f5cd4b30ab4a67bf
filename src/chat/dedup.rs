// src/chat/dedup.rs — Suppression of redelivered tokens
//
// The token channel is at-least-once: under retry or backpressure the same
// chunk can arrive twice back to back. An identical token inside the window
// is treated as a redelivery and dropped.

use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct LastToken {
    pub text: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct TokenDeduplicator {
    window: Duration,
    last: Option<LastToken>,
}

impl Default for TokenDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl TokenDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns false when `token` repeats the previous token within the window.
    pub fn accept(&mut self, token: &str, now: Instant) -> bool {
        if let Some(last) = &self.last {
            if last.text == token && now.saturating_duration_since(last.at) < self.window {
                tracing::debug!(token, "dropping duplicate token");
                return false;
            }
        }
        self.last = Some(LastToken {
            text: token.to_string(),
            at: now,
        });
        true
    }

    pub fn last(&self) -> Option<&LastToken> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
