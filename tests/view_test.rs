// tests/view_test.rs — Integration test: chat view driven by a scripted backend

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

use common::{test_config, tokens, FakeBackend};
use sparrow::backend::ChatBackend;
use sparrow::chat::assembler::TokenOutcome;
use sparrow::chat::reconciler::Lifecycle;
use sparrow::chat::subscription::TokenChannel;
use sparrow::chat::types::{Role, TokenEvent};
use sparrow::chat::view::EventOutcome;
use sparrow::chat::{ChatView, Notification, NotificationLevel};
use sparrow::infra::errors::SparrowError;

async fn mounted(
    configure: impl FnOnce(&mut FakeBackend),
) -> (ChatView, Arc<FakeBackend>, UnboundedReceiver<Notification>) {
    mounted_with_capacity(64, configure).await
}

async fn mounted_with_capacity(
    capacity: usize,
    configure: impl FnOnce(&mut FakeBackend),
) -> (ChatView, Arc<FakeBackend>, UnboundedReceiver<Notification>) {
    let channel = TokenChannel::new(capacity);
    let mut fake = FakeBackend::new(channel.clone());
    configure(&mut fake);
    let fake = Arc::new(fake);
    let backend: Arc<dyn ChatBackend> = fake.clone();
    let (mut view, rx) = ChatView::new(backend, channel, &test_config());
    view.mount().await.unwrap();
    (view, fake, rx)
}

async fn next(view: &mut ChatView) -> Option<TokenEvent> {
    tokio::time::timeout(Duration::from_millis(200), view.next_event())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn test_stream_assembles_in_order_and_persists() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    fake.script(tokens(&["The", " quick", " fox"]));

    let receipt = view.submit("Tell me about foxes").await.unwrap();
    assert!(receipt.promoted);

    let mut seen = Vec::new();
    let report = view
        .run_until_finished(|t| seen.push(t.to_string()))
        .await
        .unwrap();
    assert_eq!(seen, vec!["The", " quick", " fox"]);
    assert!(report.persisted);
    assert!(!view.is_busy());

    let session = view.active_session().await.unwrap();
    let reply = session.messages.last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "The quick fox");
    assert_eq!(reply.id, report.message_id);
    assert!(!reply.is_streaming);

    let stored = fake.stored(&receipt.session_id).unwrap();
    assert_eq!(stored.messages.last().unwrap().content, "The quick fox");
}

#[tokio::test]
async fn test_redelivered_token_applied_once() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    fake.script(tokens(&["The", " quick", " quick", " fox"]));
    view.submit("hi").await.unwrap();

    view.run_until_finished(|_| {}).await.unwrap();
    let session = view.active_session().await.unwrap();
    assert_eq!(session.messages.last().unwrap().content, "The quick fox");
}

#[tokio::test]
async fn test_throughput_ten_tokens_over_two_seconds() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    let sid = view.submit("count").await.unwrap().session_id;

    let t0 = Instant::now();
    for i in 0..10u64 {
        let outcome = view
            .handle_event_at(
                TokenEvent::token(format!("{i} ")),
                t0 + Duration::from_millis(i * 100),
            )
            .await;
        assert!(matches!(
            outcome,
            EventOutcome::Token(TokenOutcome::Started { .. } | TokenOutcome::Appended)
        ));
    }
    let EventOutcome::Finished(Some(report)) = view
        .handle_event_at(TokenEvent::finished(), t0 + Duration::from_secs(2))
        .await
    else {
        panic!("expected a finalize report");
    };
    assert_eq!(report.token_count, 10);
    assert_eq!(report.tokens_per_second, Some(5.0));

    let stored = fake.stored(&sid).unwrap();
    assert_eq!(stored.messages.last().unwrap().tokens_per_second, Some(5.0));
}

#[tokio::test]
async fn test_duplicate_finished_is_noop() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    let mut script = tokens(&["done"]);
    script.push(TokenEvent::finished());
    fake.script(script);
    view.submit("hi").await.unwrap();

    view.run_until_finished(|_| {}).await.unwrap();
    let appends = fake.append_calls();

    let extra = next(&mut view).await.unwrap();
    assert!(extra.finished);
    assert_eq!(view.handle_event(extra).await, EventOutcome::Finished(None));
    assert_eq!(fake.append_calls(), appends);
    assert_eq!(view.active_session().await.unwrap().messages.len(), 2);
}

#[tokio::test]
async fn test_empty_stream_persists_nothing() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    fake.script(vec![TokenEvent::finished()]);
    view.submit("hi").await.unwrap();

    assert!(view.run_until_finished(|_| {}).await.is_none());
    assert_eq!(fake.append_calls(), 0);
    assert!(!view.is_busy());
}

#[tokio::test]
async fn test_generation_failure_records_error() {
    let (mut view, fake, mut rx) = mounted(|f| f.fail_generation = true).await;

    let err = view.submit("hello").await.unwrap_err();
    assert!(matches!(err, SparrowError::NoModelLoaded));
    assert!(!view.is_busy());

    let session = view.active_session().await.unwrap();
    let last = session.messages.last().unwrap();
    assert!(last.is_error);
    assert!(last.content.starts_with("Error: No model is currently loaded"));

    // The session was promoted before generating, so the error is stored.
    let stored = fake.stored(&session.id).unwrap();
    assert!(stored.messages.last().unwrap().is_error);

    let n = rx.try_recv().unwrap();
    assert_eq!(n.level, NotificationLevel::Error);
    assert_eq!(n.title, "Failed to generate a response");
    // Resending will not load a model, so no retry hint.
    assert!(!n.detail.contains("try again"));
}

#[tokio::test]
async fn test_promotion_failure_keeps_message_and_skips_generation() {
    let (mut view, fake, mut rx) = mounted(|f| f.fail_persist = true).await;

    let err = view.submit("hello").await.unwrap_err();
    assert!(matches!(err, SparrowError::Backend { .. }));
    assert_eq!(fake.generation_calls(), 0);

    let session = view.active_session().await.unwrap();
    assert_eq!(
        view.reconciler().lifecycle(&session.id).await,
        Some(Lifecycle::Temporary)
    );
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].content, "hello");
    let n = rx.try_recv().unwrap();
    assert_eq!(n.title, "Failed to send message");
    assert_eq!(
        n.detail,
        "Backend call 'persist_temporary_session' failed: disk full (try again)"
    );
}

#[tokio::test]
async fn test_failed_save_keeps_local_message() {
    let (mut view, fake, mut rx) = mounted(|f| f.fail_append_assistant = true).await;
    fake.script(tokens(&["partial"]));
    view.submit("hi").await.unwrap();

    let report = view.run_until_finished(|_| {}).await.unwrap();
    assert!(!report.persisted);
    assert!(report.error.is_some());

    let reply = view
        .active_session()
        .await
        .unwrap()
        .messages
        .last()
        .cloned()
        .unwrap();
    assert_eq!(reply.id, report.message_id);
    assert_eq!(reply.content, "partial");
    assert!(!reply.is_streaming);
    assert!(!reply.is_error);
    assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Warning);
}

#[tokio::test]
async fn test_submit_rejected_while_streaming() {
    let (mut view, _fake, _rx) = mounted(|_| {}).await;
    view.submit("first").await.unwrap();
    let err = view.submit("second").await.unwrap_err();
    assert!(matches!(err, SparrowError::StreamInFlight));
}

#[tokio::test]
async fn test_remount_replaces_epoch_and_drops_stale_events() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    assert_eq!(view.epoch(), 1);

    fake.channel.emit(TokenEvent::token("stale"));
    assert!(view.remount().await.unwrap());
    assert_eq!(view.epoch(), 2);
    assert_eq!(fake.channel.listener_count(), 1);

    fake.channel.emit(TokenEvent::token("fresh"));
    assert_eq!(next(&mut view).await, Some(TokenEvent::token("fresh")));
}

#[tokio::test]
async fn test_remount_deferred_until_stream_finishes() {
    let (mut view, _fake, _rx) = mounted(|_| {}).await;
    view.submit("hi").await.unwrap();
    view.handle_event(TokenEvent::token("Hel")).await;

    assert!(!view.remount().await.unwrap());
    assert!(view.resubscribe_pending());
    assert_eq!(view.epoch(), 1);

    view.handle_event(TokenEvent::token("lo")).await;
    view.handle_event(TokenEvent::finished()).await;
    assert!(!view.resubscribe_pending());
    assert_eq!(view.epoch(), 2);
}

#[tokio::test]
async fn test_stream_stays_with_origin_session_after_switch() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    let origin = view.submit("first").await.unwrap().session_id;
    view.handle_event(TokenEvent::token("Hel")).await;

    let other = view.new_chat().await.unwrap();
    assert_ne!(other.id, origin);

    view.handle_event(TokenEvent::token("lo")).await;
    let EventOutcome::Finished(Some(report)) = view.handle_event(TokenEvent::finished()).await
    else {
        panic!("expected a finalize report");
    };
    assert_eq!(report.session_id, origin);

    let origin_local = view.reconciler().session(&origin).await.unwrap();
    assert_eq!(origin_local.messages.last().unwrap().content, "Hello");
    assert!(view.active_session().await.unwrap().messages.is_empty());
    assert_eq!(
        fake.stored(&origin).unwrap().messages.last().unwrap().content,
        "Hello"
    );
}

#[tokio::test]
async fn test_delete_refused_for_streaming_session() {
    let (mut view, _fake, _rx) = mounted(|_| {}).await;
    let sid = view.submit("hi").await.unwrap().session_id;
    view.handle_event(TokenEvent::token("x")).await;
    let err = view.delete_session(&sid).await.unwrap_err();
    assert!(matches!(err, SparrowError::StreamInFlight));
}

#[tokio::test]
async fn test_request_carries_generation_settings() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    let sid = view.submit("hi").await.unwrap().session_id;

    let requests = fake.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let r = &requests[0];
    assert_eq!(r.message, "hi");
    assert_eq!(r.session_id.as_deref(), Some(sid.as_str()));
    assert_eq!(r.model.as_deref(), Some("OpenVINO/fake-model"));
    assert!(r.include_history);
    assert!(!r.use_rag());
}

#[tokio::test]
async fn test_unmount_abandons_stream() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    let sid = view.submit("hi").await.unwrap().session_id;
    view.handle_event(TokenEvent::token("half")).await;

    view.unmount().await;
    assert!(!view.is_busy());
    assert_eq!(view.epoch(), 0);

    let local = view.reconciler().session(&sid).await.unwrap();
    assert!(!local.messages.last().unwrap().is_streaming);
    // Only the user message reached the backend.
    assert_eq!(fake.stored(&sid).unwrap().messages.len(), 1);
}

#[tokio::test]
async fn test_remount_after_submit_waits_for_first_token() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    fake.script(tokens(&["Hel", "lo"]));
    view.submit("hi").await.unwrap();

    // Generation has started but nothing has arrived yet.
    assert!(!view.remount().await.unwrap());
    assert!(view.resubscribe_pending());
    assert_eq!(view.epoch(), 1);

    let report = view.run_until_finished(|_| {}).await.unwrap();
    assert!(report.persisted);
    assert_eq!(
        view.active_session().await.unwrap().messages.last().unwrap().content,
        "Hello"
    );
    assert!(!view.is_busy());
    assert_eq!(view.epoch(), 2);

    fake.script(tokens(&["again"]));
    view.submit("once more").await.unwrap();
    view.run_until_finished(|_| {}).await.unwrap();
    assert!(!view.is_busy());
}

#[tokio::test]
async fn test_token_redelivered_after_finished_is_ignored() {
    let (mut view, fake, _rx) = mounted(|_| {}).await;
    let mut script = tokens(&["The", " fox"]);
    script.push(TokenEvent::token(" fox"));
    fake.script(script);
    view.submit("hi").await.unwrap();
    view.run_until_finished(|_| {}).await.unwrap();

    let late = next(&mut view).await.unwrap();
    assert_eq!(
        view.handle_event(late).await,
        EventOutcome::Token(TokenOutcome::Ignored)
    );
    assert!(!view.is_busy());

    let messages = view.active_session().await.unwrap().messages;
    let contents: Vec<(&str, bool)> = messages
        .iter()
        .map(|m| (m.content.as_str(), m.is_streaming))
        .collect();
    assert_eq!(contents, vec![("hi", false), ("The fox", false)]);

    view.submit("next").await.unwrap();
}

#[tokio::test]
async fn test_token_without_generation_is_ignored() {
    let (mut view, _fake, _rx) = mounted(|_| {}).await;
    view.new_chat().await.unwrap();

    assert_eq!(
        view.handle_event(TokenEvent::token("stray")).await,
        EventOutcome::Token(TokenOutcome::Ignored)
    );
    assert!(!view.is_busy());
    assert!(view.active_session().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_lagged_stream_is_discarded_not_saved() {
    let (mut view, fake, mut rx) = mounted_with_capacity(4, |_| {}).await;
    let words: Vec<String> = (0..10).map(|i| format!("w{i} ")).collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    fake.script(tokens(&words));
    let sid = view.submit("count to ten").await.unwrap().session_id;

    let report = view.run_until_finished(|_| {}).await.unwrap();
    assert!(!report.persisted);
    assert_eq!(report.error.as_deref(), Some("7 streamed events were lost"));
    assert!(!view.is_busy());

    let reply = view
        .reconciler()
        .session(&sid)
        .await
        .unwrap()
        .messages
        .last()
        .cloned()
        .unwrap();
    assert!(reply.is_error);
    assert!(!reply.is_streaming);

    // Only the user message reached the backend.
    assert_eq!(fake.append_calls(), 0);
    assert_eq!(fake.stored(&sid).unwrap().messages.len(), 1);

    let n = rx.try_recv().unwrap();
    assert_eq!(n.level, NotificationLevel::Warning);
    assert_eq!(n.title, "Response incomplete");
    assert!(rx.try_recv().is_err());
}
