// src/chat/types.rs — Messages, sessions and token events

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Title given to sessions before their first user message names them.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix millis.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    /// Only ever true for the in-flight assistant message; never persisted.
    #[serde(skip)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now().timestamp_millis(),
            is_streaming: false,
            is_error: false,
            tokens_per_second: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// A fresh in-flight assistant message seeded with its first token.
    pub fn streaming_assistant(first_token: impl Into<String>) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, first_token)
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Assistant, content)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            created_at: now,
            updated_at: now,
            model_id: None,
            messages: Vec::new(),
        }
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// Everything the backend knows about persisted sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsSnapshot {
    pub sessions: HashMap<String, Session>,
    pub active_session_id: Option<String>,
}

/// Payload of the backend's `chat-token` channel. `finished` events carry
/// no token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub token: String,
    pub finished: bool,
}

impl TokenEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            token: text.into(),
            finished: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            token: String::new(),
            finished: true,
        }
    }
}
