// src/chat/view.rs — The chat view: one instance owns all streaming state
//
// Wires the token subscription, the assembler and finalizer, and the
// session reconciler together. Everything is driven from the caller's task:
// `submit` starts a generation, then `next_event` + `handle_event` are
// pumped until the stream reports `finished`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::assembler::{StreamAssembler, TokenOutcome};
use super::dedup::TokenDeduplicator;
use super::finalizer::{CompletionFinalizer, FinalizeReport};
use super::notification::{Notification, Notifier};
use super::reconciler::{SendReceipt, SessionReconciler};
use super::segment::{segment, ContentPart};
use super::subscription::{SubscriptionManager, TokenChannel};
use super::types::{Message, Session, TokenEvent};
use crate::backend::{ChatBackend, GenerationRequest, SamplingParams};
use crate::infra::config::{Config, GenerationConfig, RagConfig};
use crate::infra::errors::SparrowError;

/// What a single channel event did to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Token(TokenOutcome),
    /// `None` when there was no stream to finish.
    Finished(Option<FinalizeReport>),
}

pub struct ChatView {
    backend: Arc<dyn ChatBackend>,
    reconciler: SessionReconciler,
    finalizer: CompletionFinalizer,
    assembler: StreamAssembler,
    subscriptions: SubscriptionManager,
    /// Session the next stream belongs to, fixed when generation starts.
    pending_session: Option<String>,
    /// Events the current stream lost to listener lag.
    lost_events: u64,
    resubscribe_pending: bool,
    model: Option<String>,
    generation: GenerationConfig,
    rag: RagConfig,
    notifier: Notifier,
}

impl ChatView {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        channel: TokenChannel,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = Notifier::channel();
        let view = Self {
            reconciler: SessionReconciler::new(backend.clone()),
            finalizer: CompletionFinalizer::new(backend.clone()),
            backend,
            assembler: StreamAssembler::new(TokenDeduplicator::new(config.stream.dedup_window())),
            subscriptions: SubscriptionManager::new(channel, config.stream.resubscribe_grace()),
            pending_session: None,
            lost_events: 0,
            resubscribe_pending: false,
            model: config.server.model.clone(),
            generation: config.generation.clone(),
            rag: config.rag.clone(),
            notifier,
        };
        (view, rx)
    }

    /// Load sessions and start listening. A failed load is reported and the
    /// view starts empty.
    pub async fn mount(&mut self) -> Result<(), SparrowError> {
        if let Err(e) = self.reconciler.load().await {
            tracing::warn!("Failed to load chat sessions: {e}");
            self.notifier.error("Failed to load chat sessions", failure_detail(&e));
        }
        self.subscriptions.resubscribe(false).await?;
        Ok(())
    }

    /// Re-establish the subscription. From the moment generation starts
    /// until its stream finishes this is deferred; returns whether it
    /// happened now.
    pub async fn remount(&mut self) -> Result<bool, SparrowError> {
        match self.subscriptions.resubscribe(self.is_busy()).await {
            Ok(_) => Ok(true),
            Err(SparrowError::StreamInFlight) => {
                self.resubscribe_pending = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop listening. A stream still in flight is abandoned: its partial
    /// content stays on screen but is never persisted.
    pub async fn unmount(&mut self) {
        self.subscriptions.unsubscribe();
        self.resubscribe_pending = false;
        self.pending_session = None;
        self.lost_events = 0;
        if let Some(abandoned) = self.assembler.finish(Instant::now()) {
            tracing::warn!(
                session_id = %abandoned.session_id,
                tokens = abandoned.token_count,
                "stream abandoned before it finished"
            );
            self.reconciler
                .update_message(&abandoned.session_id, &abandoned.message_id, |m| {
                    m.is_streaming = false
                })
                .await;
        }
    }

    /// Send a user message and start generating the reply.
    pub async fn submit(&mut self, text: &str) -> Result<SendReceipt, SparrowError> {
        if text.trim().is_empty() {
            return Err(SparrowError::Other(anyhow::anyhow!("message is empty")));
        }
        if self.assembler.is_streaming() || self.pending_session.is_some() {
            return Err(SparrowError::StreamInFlight);
        }

        let receipt = match self.reconciler.send_message(text).await {
            Ok(r) => r,
            Err(e) => {
                self.notifier.error("Failed to send message", failure_detail(&e));
                return Err(e);
            }
        };

        let request = self.generation_request(text, &receipt.session_id);
        match self.backend.start_generation(request).await {
            Ok(()) => {
                self.pending_session = Some(receipt.session_id.clone());
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(session_id = %receipt.session_id, "Failed to start generation: {e}");
                let content = format!("Error: {e}");
                if let Err(record) = self.reconciler.record_error(&receipt.session_id, &content).await {
                    tracing::warn!("Failed to record error message: {record}");
                }
                self.notifier.error("Failed to generate a response", failure_detail(&e));
                Err(e)
            }
        }
    }

    fn generation_request(&self, text: &str, session_id: &str) -> GenerationRequest {
        let g = &self.generation;
        GenerationRequest {
            model: self.model.clone(),
            message: text.to_string(),
            session_id: Some(session_id.to_string()),
            include_history: g.include_history,
            system_prompt: Some(g.system_prompt.clone()),
            sampling: SamplingParams {
                temperature: g.temperature,
                top_p: g.top_p,
                seed: g.seed,
                max_tokens: g.max_tokens,
                max_completion_tokens: g.max_completion_tokens,
            },
            rag_limit: self.rag.enabled.then_some(self.rag.limit),
        }
    }

    /// Next event from the live subscription. `None` once unsubscribed or
    /// superseded.
    pub async fn next_event(&mut self) -> Option<TokenEvent> {
        let event = self.subscriptions.recv().await;
        let lost = self.subscriptions.take_lost();
        if lost > 0 {
            self.on_lagged(lost);
        }
        event
    }

    /// The live subscription lost events. A reply with a gap is discarded
    /// instead of saved when `finished` arrives.
    fn on_lagged(&mut self, lost: u64) {
        if !self.is_busy() {
            tracing::debug!(lost, "events lost while idle");
            return;
        }
        if self.lost_events == 0 {
            self.notifier.warn(
                "Response incomplete",
                format_args!("{lost} streamed events were lost; the reply will not be saved"),
            );
        }
        self.lost_events += lost;
    }

    pub async fn handle_event(&mut self, event: TokenEvent) -> EventOutcome {
        self.handle_event_at(event, Instant::now()).await
    }

    pub async fn handle_event_at(&mut self, event: TokenEvent, now: Instant) -> EventOutcome {
        if event.finished {
            return EventOutcome::Finished(self.on_finished(now).await);
        }

        // Only a generation this view started may open a message.
        let origin = self
            .assembler
            .session_id()
            .or(self.pending_session.as_deref());
        let session_id = match origin {
            Some(id) => id.to_string(),
            None => {
                tracing::debug!(token = %event.token, "token with no generation pending");
                return EventOutcome::Token(TokenOutcome::Ignored);
            }
        };

        let assembler = &mut self.assembler;
        let outcome = self
            .reconciler
            .with_messages_mut(&session_id, |messages| {
                assembler.on_token(&event.token, &session_id, messages, now)
            })
            .await
            .unwrap_or(TokenOutcome::Orphaned);
        if outcome == TokenOutcome::Duplicate {
            tracing::debug!(token = %event.token, "duplicate token dropped");
        }
        EventOutcome::Token(outcome)
    }

    async fn on_finished(&mut self, now: Instant) -> Option<FinalizeReport> {
        self.pending_session = None;
        let lost = std::mem::take(&mut self.lost_events);
        let report = if lost > 0 {
            let reason = format!("{lost} streamed events were lost");
            self.finalizer
                .discard(&mut self.assembler, &self.reconciler, now, &reason)
                .await
        } else {
            let report = self
                .finalizer
                .finalize(&mut self.assembler, &self.reconciler, now)
                .await;
            if let Some(error) = report.as_ref().and_then(|r| r.error.as_ref()) {
                self.notifier.warn("Failed to save response", error);
            }
            report
        };

        if self.resubscribe_pending {
            self.resubscribe_pending = false;
            if let Err(e) = self.subscriptions.resubscribe(false).await {
                tracing::warn!("Deferred resubscribe failed: {e}");
            }
        }
        report
    }

    /// Pump events until the current stream finishes, calling `on_token`
    /// for every token that made it into the message.
    pub async fn run_until_finished(
        &mut self,
        mut on_token: impl FnMut(&str),
    ) -> Option<FinalizeReport> {
        while let Some(event) = self.next_event().await {
            let token = event.token.clone();
            match self.handle_event(event).await {
                EventOutcome::Finished(report) => return report,
                EventOutcome::Token(TokenOutcome::Started { .. } | TokenOutcome::Appended) => {
                    on_token(&token)
                }
                EventOutcome::Token(_) => {}
            }
        }
        None
    }

    pub async fn switch_session(&mut self, session_id: &str) -> Result<Session, SparrowError> {
        self.reconciler.switch_session(session_id).await.inspect_err(|e| {
            self.notifier.error("Failed to switch session", failure_detail(e));
        })
    }

    pub async fn new_chat(&mut self) -> Result<Session, SparrowError> {
        self.reconciler.new_chat().await.inspect_err(|e| {
            self.notifier.error("Failed to create chat", failure_detail(e));
        })
    }

    pub async fn delete_session(&mut self, session_id: &str) -> Result<(), SparrowError> {
        if self.assembler.session_id() == Some(session_id)
            || self.pending_session.as_deref() == Some(session_id)
        {
            return Err(SparrowError::StreamInFlight);
        }
        self.reconciler.delete_session(session_id).await.inspect_err(|e| {
            self.notifier.error("Failed to delete session", failure_detail(e));
        })
    }

    pub fn reconciler(&self) -> &SessionReconciler {
        &self.reconciler
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.reconciler.active_session().await
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.reconciler.sessions().await
    }

    pub fn is_streaming(&self) -> bool {
        self.assembler.is_streaming()
    }

    /// Generation has been started and its stream has not finished yet.
    pub fn is_busy(&self) -> bool {
        self.assembler.is_streaming() || self.pending_session.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.subscriptions.epoch()
    }

    pub fn resubscribe_pending(&self) -> bool {
        self.resubscribe_pending
    }
}

/// Notification detail for a failed operation, with a retry hint when
/// resending may help.
fn failure_detail(e: &SparrowError) -> String {
    if e.is_transient() {
        format!("{e} (try again)")
    } else {
        e.to_string()
    }
}

/// Display parts of a message.
pub fn segments(message: &Message) -> Vec<ContentPart> {
    segment(&message.content, message.is_streaming)
}
