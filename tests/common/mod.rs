// tests/common/mod.rs — Scripted in-memory backend shared by integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use sparrow::backend::{ChatBackend, GenerationRequest, NewMessage};
use sparrow::chat::subscription::TokenChannel;
use sparrow::chat::types::{Message, Session, SessionsSnapshot, TokenEvent};
use sparrow::infra::config::Config;
use sparrow::infra::errors::SparrowError;

/// A backend that keeps sessions in a map and, on `start_generation`,
/// replays a canned list of `chat-token` events.
pub struct FakeBackend {
    pub channel: TokenChannel,
    sessions: Mutex<HashMap<String, Session>>,
    active: Mutex<Option<String>>,
    script: Mutex<Vec<TokenEvent>>,
    pub fail_persist: bool,
    pub fail_generation: bool,
    pub fail_append_assistant: bool,
    /// Simulated latency of `persist_temporary_session`.
    pub persist_delay: Duration,
    pub persist_calls: AtomicUsize,
    pub append_calls: AtomicUsize,
    pub generation_calls: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeBackend {
    pub fn new(channel: TokenChannel) -> Self {
        Self {
            channel,
            sessions: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            script: Mutex::new(Vec::new()),
            fail_persist: false,
            fail_generation: false,
            fail_append_assistant: false,
            persist_delay: Duration::ZERO,
            persist_calls: AtomicUsize::new(0),
            append_calls: AtomicUsize::new(0),
            generation_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Events replayed by the next `start_generation`.
    pub fn script(&self, events: Vec<TokenEvent>) {
        *self.script.lock().unwrap() = events;
    }

    pub fn stored(&self, id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn stored_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn generation_calls(&self) -> usize {
        self.generation_calls.load(Ordering::SeqCst)
    }
}

/// Tokens followed by a single `finished`.
pub fn tokens(parts: &[&str]) -> Vec<TokenEvent> {
    let mut events: Vec<TokenEvent> = parts.iter().map(|t| TokenEvent::token(*t)).collect();
    events.push(TokenEvent::finished());
    events
}

/// Defaults with no resubscribe grace, so tests never sleep.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.stream.resubscribe_grace_ms = 0;
    config.server.model = Some("OpenVINO/fake-model".into());
    config
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn create_temporary_chat_session(
        &self,
        title: Option<String>,
    ) -> Result<Session, SparrowError> {
        Ok(Session::new(title))
    }

    async fn add_message_to_temporary_session(
        &self,
        mut session: Session,
        message: NewMessage,
    ) -> Result<(Session, Message), SparrowError> {
        let message = message.into_message();
        session.messages.push(message.clone());
        Ok((session, message))
    }

    async fn persist_temporary_session(&self, session: Session) -> Result<Session, SparrowError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if !self.persist_delay.is_zero() {
            tokio::time::sleep(self.persist_delay).await;
        }
        if self.fail_persist {
            return Err(SparrowError::backend("persist_temporary_session", "disk full"));
        }
        // The backend assigns its own id.
        let mut stored = session;
        stored.id = format!("db-{}", stored.id);
        self.sessions
            .lock()
            .unwrap()
            .insert(stored.id.clone(), stored.clone());
        *self.active.lock().unwrap() = Some(stored.id.clone());
        Ok(stored)
    }

    async fn add_message_to_session(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<Message, SparrowError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_append_assistant && !message.is_error && message.role.as_str() == "assistant" {
            return Err(SparrowError::backend("add_message_to_session", "timeout"));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SparrowError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        let mut message = message.into_message();
        message.id = format!("db-msg-{}", session.messages.len());
        session.messages.push(message.clone());
        session.title = "Renamed by backend".into();
        Ok(message)
    }

    async fn update_chat_session(
        &self,
        session_id: &str,
        title: Option<String>,
        model_id: Option<String>,
    ) -> Result<Session, SparrowError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SparrowError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        if let Some(title) = title {
            session.title = title;
        }
        if model_id.is_some() {
            session.model_id = model_id;
        }
        Ok(session.clone())
    }

    async fn get_chat_sessions(&self) -> Result<SessionsSnapshot, SparrowError> {
        Ok(SessionsSnapshot {
            sessions: self.sessions.lock().unwrap().clone(),
            active_session_id: self.active.lock().unwrap().clone(),
        })
    }

    async fn get_session_messages(&self, session_id: &str) -> Result<Vec<Message>, SparrowError> {
        self.stored(session_id)
            .map(|s| s.messages)
            .ok_or_else(|| SparrowError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    async fn set_active_chat_session(&self, session_id: &str) -> Result<(), SparrowError> {
        *self.active.lock().unwrap() = Some(session_id.to_string());
        Ok(())
    }

    async fn delete_chat_session(&self, session_id: &str) -> Result<(), SparrowError> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn start_generation(&self, request: GenerationRequest) -> Result<(), SparrowError> {
        self.generation_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if self.fail_generation {
            return Err(SparrowError::NoModelLoaded);
        }
        let events = std::mem::take(&mut *self.script.lock().unwrap());
        for event in events {
            self.channel.emit(event);
        }
        Ok(())
    }
}
