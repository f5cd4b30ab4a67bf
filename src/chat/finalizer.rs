// src/chat/finalizer.rs — Closes out a finished stream

use std::sync::Arc;
use std::time::Instant;

use super::assembler::StreamAssembler;
use super::reconciler::{Lifecycle, SessionReconciler};
use crate::backend::{ChatBackend, NewMessage};

/// What happened to the message a stream produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    /// Backend id when persisted, the local id otherwise.
    pub message_id: String,
    pub session_id: String,
    pub token_count: u32,
    pub tokens_per_second: Option<f64>,
    pub persisted: bool,
    /// Set when persisting was attempted and failed.
    pub error: Option<String>,
}

pub struct CompletionFinalizer {
    backend: Arc<dyn ChatBackend>,
}

impl CompletionFinalizer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Handle `finished`. Returns `None` when no stream was active, so a
    /// repeated `finished` does nothing.
    ///
    /// The assembler is reset before any backend call; a failed append is
    /// reported but never retried and the local message is kept as is.
    pub async fn finalize(
        &self,
        assembler: &mut StreamAssembler,
        reconciler: &SessionReconciler,
        now: Instant,
    ) -> Option<FinalizeReport> {
        let finished = assembler.finish(now)?;
        let session_id = finished.session_id;
        let local_id = finished.message_id;
        let tps = finished.tokens_per_second;

        let mut report = FinalizeReport {
            message_id: local_id.clone(),
            session_id: session_id.clone(),
            token_count: finished.token_count,
            tokens_per_second: tps,
            persisted: false,
            error: None,
        };

        let content = reconciler
            .update_message(&session_id, &local_id, |m| {
                m.is_streaming = false;
                m.tokens_per_second = tps;
                m.content.clone()
            })
            .await;
        let Some(content) = content else {
            tracing::warn!(%session_id, message_id = %local_id, "finished stream has no message");
            return Some(report);
        };

        tracing::debug!(
            %session_id,
            tokens = finished.token_count,
            ms = finished.duration.as_millis() as u64,
            "stream finished"
        );

        if content.is_empty() {
            return Some(report);
        }
        if reconciler.lifecycle(&session_id).await != Some(Lifecycle::Persisted) {
            tracing::debug!(%session_id, "session not persisted; response kept locally");
            return Some(report);
        }

        match self
            .backend
            .add_message_to_session(&session_id, NewMessage::assistant(content, tps))
            .await
        {
            Ok(saved) => {
                reconciler
                    .replace_message_id(&session_id, &local_id, &saved.id)
                    .await;
                report.message_id = saved.id;
                report.persisted = true;
            }
            Err(e) => {
                tracing::warn!(%session_id, "Failed to save assistant message: {e}");
                report.error = Some(e.to_string());
            }
        }
        Some(report)
    }

    /// Close a stream whose content has a gap in it. The message stops
    /// streaming and is flagged as an error locally; nothing is persisted.
    pub async fn discard(
        &self,
        assembler: &mut StreamAssembler,
        reconciler: &SessionReconciler,
        now: Instant,
        reason: &str,
    ) -> Option<FinalizeReport> {
        let finished = assembler.finish(now)?;
        tracing::warn!(
            session_id = %finished.session_id,
            tokens = finished.token_count,
            "incomplete stream discarded: {reason}"
        );
        reconciler
            .update_message(&finished.session_id, &finished.message_id, |m| {
                m.is_streaming = false;
                m.is_error = true;
                m.tokens_per_second = finished.tokens_per_second;
            })
            .await;
        Some(FinalizeReport {
            message_id: finished.message_id,
            session_id: finished.session_id,
            token_count: finished.token_count,
            tokens_per_second: finished.tokens_per_second,
            persisted: false,
            error: Some(reason.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::generation::GenerationClient;
    use crate::backend::local::LocalBackend;
    use crate::backend::store::SessionStore;
    use crate::chat::subscription::TokenChannel;
    use std::time::Duration;

    fn setup() -> (Arc<dyn ChatBackend>, SessionReconciler, CompletionFinalizer) {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::new(
            SessionStore::open_in_memory().unwrap(),
            GenerationClient::new("http://127.0.0.1:9", TokenChannel::new(8)),
            None,
        ));
        let reconciler = SessionReconciler::new(backend.clone());
        let finalizer = CompletionFinalizer::new(backend.clone());
        (backend, reconciler, finalizer)
    }

    #[tokio::test]
    async fn test_idle_finish_is_noop() {
        let (_, r, f) = setup();
        let mut asm = StreamAssembler::default();
        assert!(f.finalize(&mut asm, &r, Instant::now()).await.is_none());
    }

    #[tokio::test]
    async fn test_finalize_persists_and_swaps_id() {
        let (backend, r, f) = setup();
        let sid = r.send_message("hi").await.unwrap().session_id;
        let mut asm = StreamAssembler::default();
        let t0 = Instant::now();
        for (i, tok) in ["Hel", "lo"].iter().enumerate() {
            r.with_messages_mut(&sid, |msgs| {
                asm.on_token(tok, &sid, msgs, t0 + Duration::from_millis(i as u64 * 500))
            })
            .await
            .unwrap();
        }

        let report = f
            .finalize(&mut asm, &r, t0 + Duration::from_secs(1))
            .await
            .unwrap();
        assert!(report.persisted);
        assert_eq!(report.tokens_per_second, Some(2.0));
        assert!(!asm.is_streaming());

        let local = r.session(&sid).await.unwrap();
        let last = local.messages.last().unwrap();
        assert_eq!(last.id, report.message_id);
        assert!(!last.is_streaming);

        let stored = backend.get_session_messages(&sid).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "Hello");
        assert_eq!(stored[1].tokens_per_second, Some(2.0));

        // A second finished changes nothing.
        assert!(f.finalize(&mut asm, &r, Instant::now()).await.is_none());
        assert_eq!(backend.get_session_messages(&sid).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_discard_never_persists() {
        let (backend, r, f) = setup();
        let sid = r.send_message("hi").await.unwrap().session_id;
        let mut asm = StreamAssembler::default();
        let t0 = Instant::now();
        r.with_messages_mut(&sid, |msgs| asm.on_token("w7 ", &sid, msgs, t0))
            .await
            .unwrap();

        let report = f.discard(&mut asm, &r, t0, "7 events lost").await.unwrap();
        assert!(!report.persisted);
        assert_eq!(report.error.as_deref(), Some("7 events lost"));
        assert!(!asm.is_streaming());

        let last = r.session(&sid).await.unwrap().messages.last().cloned().unwrap();
        assert!(last.is_error);
        assert!(!last.is_streaming);
        assert_eq!(backend.get_session_messages(&sid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_temporary_session_not_persisted() {
        let (_, r, f) = setup();
        let sid = r.ensure_active_session().await.unwrap().id;
        let mut asm = StreamAssembler::default();
        let t0 = Instant::now();
        r.with_messages_mut(&sid, |msgs| asm.on_token("x", &sid, msgs, t0))
            .await
            .unwrap();
        let report = f.finalize(&mut asm, &r, t0).await.unwrap();
        assert!(!report.persisted);
        assert!(report.error.is_none());
        assert!(report.tokens_per_second.is_none());
    }
}
