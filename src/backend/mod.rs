// src/backend/mod.rs — RPC contract between the chat core and its backend

pub mod generation;
pub mod local;
pub mod schema;
pub mod store;
pub mod title;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::types::{Message, Role, Session, SessionsSnapshot};
use crate::infra::errors::SparrowError;

/// Everything the chat core asks of the backend. Generation output never
/// comes back through here; it arrives on the `chat-token` channel.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// A session shell that is not stored anywhere yet.
    async fn create_temporary_chat_session(
        &self,
        title: Option<String>,
    ) -> Result<Session, SparrowError>;

    async fn add_message_to_temporary_session(
        &self,
        session: Session,
        message: NewMessage,
    ) -> Result<(Session, Message), SparrowError>;

    /// Store a temporary session. The returned session carries the
    /// canonical id.
    async fn persist_temporary_session(&self, session: Session) -> Result<Session, SparrowError>;

    async fn add_message_to_session(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<Message, SparrowError>;

    async fn update_chat_session(
        &self,
        session_id: &str,
        title: Option<String>,
        model_id: Option<String>,
    ) -> Result<Session, SparrowError>;

    async fn get_chat_sessions(&self) -> Result<SessionsSnapshot, SparrowError>;

    async fn get_session_messages(&self, session_id: &str) -> Result<Vec<Message>, SparrowError>;

    async fn set_active_chat_session(&self, session_id: &str) -> Result<(), SparrowError>;

    async fn delete_chat_session(&self, session_id: &str) -> Result<(), SparrowError>;

    /// Fire-and-forget: returns once generation has been started.
    async fn start_generation(&self, request: GenerationRequest) -> Result<(), SparrowError>;
}

/// Message payload for the append RPCs.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub tokens_per_second: Option<f64>,
    pub is_error: bool,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tokens_per_second: None,
            is_error: false,
        }
    }

    pub fn assistant(content: impl Into<String>, tokens_per_second: Option<f64>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tokens_per_second,
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tokens_per_second: None,
            is_error: true,
        }
    }

    /// Materialize with a fresh id and timestamp.
    pub fn into_message(self) -> Message {
        Message {
            tokens_per_second: self.tokens_per_second,
            is_error: self.is_error,
            ..Message::new(self.role, self.content)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
    pub max_tokens: Option<u32>,
    pub max_completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Model to use; `None` means whatever the backend has loaded.
    pub model: Option<String>,
    pub message: String,
    pub session_id: Option<String>,
    pub include_history: bool,
    pub system_prompt: Option<String>,
    pub sampling: SamplingParams,
    /// Retrieval-augmented variant: number of chunks to retrieve.
    pub rag_limit: Option<u32>,
}

impl GenerationRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            model: None,
            message: message.into(),
            session_id: None,
            include_history: false,
            system_prompt: None,
            sampling: SamplingParams::default(),
            rag_limit: None,
        }
    }

    pub fn use_rag(&self) -> bool {
        self.rag_limit.is_some()
    }
}
