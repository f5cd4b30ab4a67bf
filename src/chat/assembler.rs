// src/chat/assembler.rs — Builds the in-flight assistant message from tokens

use std::time::{Duration, Instant};

use super::dedup::TokenDeduplicator;
use super::types::Message;

/// Counters for the stream currently being assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStream {
    pub message_id: String,
    /// Session that owns the in-flight message, fixed when the stream starts.
    pub session_id: String,
    pub token_count: u32,
    pub started_at: Instant,
}

/// Snapshot taken when a stream ends.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedStream {
    pub message_id: String,
    pub session_id: String,
    pub token_count: u32,
    pub duration: Duration,
    pub tokens_per_second: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// First token: a new assistant message was pushed.
    Started { message_id: String },
    Appended,
    Duplicate,
    /// Empty token; nothing to do.
    Ignored,
    /// The in-flight message is gone from its session.
    Orphaned,
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    active: Option<ActiveStream>,
    dedup: TokenDeduplicator,
}

impl StreamAssembler {
    pub fn new(dedup: TokenDeduplicator) -> Self {
        Self {
            active: None,
            dedup,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveStream> {
        self.active.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// Apply one token to `messages`, the message list of `session_id`.
    ///
    /// While idle the token opens a new streaming assistant message; while
    /// streaming it is appended to the active one. `session_id` is ignored
    /// once a stream is active: tokens always go to the stream's session.
    pub fn on_token(
        &mut self,
        token: &str,
        session_id: &str,
        messages: &mut Vec<Message>,
        now: Instant,
    ) -> TokenOutcome {
        if token.is_empty() {
            return TokenOutcome::Ignored;
        }
        if !self.dedup.accept(token, now) {
            return TokenOutcome::Duplicate;
        }

        match self.active.as_mut() {
            None => {
                let message = Message::streaming_assistant(token);
                let message_id = message.id.clone();
                messages.push(message);
                self.active = Some(ActiveStream {
                    message_id: message_id.clone(),
                    session_id: session_id.to_string(),
                    token_count: 1,
                    started_at: now,
                });
                tracing::debug!(%message_id, session_id, "stream started");
                TokenOutcome::Started { message_id }
            }
            Some(active) => match messages.iter_mut().find(|m| m.id == active.message_id) {
                Some(message) => {
                    message.content.push_str(token);
                    active.token_count += 1;
                    TokenOutcome::Appended
                }
                None => {
                    tracing::warn!(
                        message_id = %active.message_id,
                        "streaming message missing from its session; token dropped"
                    );
                    TokenOutcome::Orphaned
                }
            },
        }
    }

    /// End the active stream, returning its metrics and resetting to idle.
    /// `None` when already idle, so a duplicate `finished` is harmless.
    pub fn finish(&mut self, now: Instant) -> Option<FinishedStream> {
        let active = self.active.take()?;
        self.dedup.reset();

        let duration = now.saturating_duration_since(active.started_at);
        Some(FinishedStream {
            tokens_per_second: throughput(active.token_count, duration),
            message_id: active.message_id,
            session_id: active.session_id,
            token_count: active.token_count,
            duration,
        })
    }
}

/// Tokens per second; `None` for a zero-length stream.
pub fn throughput(token_count: u32, duration: Duration) -> Option<f64> {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        Some(f64::from(token_count) / secs)
    } else {
        None
    }
}
