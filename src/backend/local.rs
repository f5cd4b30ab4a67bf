// src/backend/local.rs — In-process backend: SQLite sessions + local model server

use async_trait::async_trait;
use std::sync::Mutex;

use super::generation::{self, GenerationClient};
use super::store::SessionStore;
use super::{ChatBackend, GenerationRequest, NewMessage};
use crate::chat::types::{Message, Session, SessionsSnapshot};
use crate::infra::errors::SparrowError;

pub struct LocalBackend {
    store: Mutex<SessionStore>,
    generator: GenerationClient,
    loaded_model: Option<String>,
}

impl LocalBackend {
    pub fn new(store: SessionStore, generator: GenerationClient, loaded_model: Option<String>) -> Self {
        Self {
            store: Mutex::new(store),
            generator,
            loaded_model,
        }
    }

    fn with_store<R>(
        &self,
        f: impl FnOnce(&SessionStore) -> Result<R, SparrowError>,
    ) -> Result<R, SparrowError> {
        let store = self
            .store
            .lock()
            .map_err(|_| SparrowError::Other(anyhow::anyhow!("session store lock poisoned")))?;
        f(&store)
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
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
        if message.role == crate::chat::types::Role::User && session.has_placeholder_title() {
            session.title = super::title::generate_chat_title(&message.content);
        }
        session.updated_at = message.created_at;
        session.messages.push(message.clone());
        Ok((session, message))
    }

    async fn persist_temporary_session(&self, session: Session) -> Result<Session, SparrowError> {
        self.with_store(|store| {
            store.save_session(&session)?;
            store.set_active_session(Some(&session.id))?;
            Ok(())
        })?;
        tracing::info!(session_id = %session.id, "persisted chat session");
        Ok(session)
    }

    async fn add_message_to_session(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<Message, SparrowError> {
        self.with_store(|store| store.append_message(session_id, message))
    }

    async fn update_chat_session(
        &self,
        session_id: &str,
        title: Option<String>,
        model_id: Option<String>,
    ) -> Result<Session, SparrowError> {
        self.with_store(|store| {
            store.update_session(session_id, title.as_deref(), model_id.as_deref())
        })
    }

    async fn get_chat_sessions(&self) -> Result<SessionsSnapshot, SparrowError> {
        self.with_store(|store| {
            Ok(SessionsSnapshot {
                sessions: store.list_sessions()?,
                active_session_id: store.active_session_id()?,
            })
        })
    }

    async fn get_session_messages(&self, session_id: &str) -> Result<Vec<Message>, SparrowError> {
        self.with_store(|store| {
            store
                .get_session(session_id)?
                .map(|s| s.messages)
                .ok_or_else(|| SparrowError::SessionNotFound {
                    id: session_id.to_string(),
                })
        })
    }

    async fn set_active_chat_session(&self, session_id: &str) -> Result<(), SparrowError> {
        self.with_store(|store| store.set_active_session(Some(session_id)))
    }

    async fn delete_chat_session(&self, session_id: &str) -> Result<(), SparrowError> {
        self.with_store(|store| store.delete_session(session_id))
    }

    async fn start_generation(&self, request: GenerationRequest) -> Result<(), SparrowError> {
        let model = request
            .model
            .as_deref()
            .or(self.loaded_model.as_deref())
            .ok_or(SparrowError::NoModelLoaded)?;
        let model_name = generation::served_model_name(model);

        let history = match (&request.session_id, request.include_history) {
            (Some(id), true) => self
                .with_store(|store| store.conversation_history(id))
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to get conversation history: {e}");
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        if let Some(limit) = request.rag_limit {
            tracing::warn!(
                limit,
                "document retrieval requested but no index is attached; answering without context"
            );
        }

        let system_prompt = request
            .system_prompt
            .as_deref()
            .unwrap_or(generation::DEFAULT_SYSTEM_PROMPT);
        let messages = generation::build_messages(system_prompt, history, &request.message);
        let body = generation::build_body(model_name, messages, &request.sampling);

        tracing::info!(model = model_name, "starting streaming chat");
        self.generator.start(body).await
    }
}
