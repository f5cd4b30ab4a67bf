// src/backend/store.rs — SQLite persistence for chat sessions

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

use super::schema;
use super::title::generate_chat_title;
use super::NewMessage;
use crate::chat::types::{Message, Role, Session};
use crate::infra::errors::SparrowError;

const ACTIVE_SESSION_KEY: &str = "active_session_id";

/// Persisted sessions and their messages.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        schema::run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    // -- Sessions --

    pub fn list_sessions(&self) -> Result<HashMap<String, Session>, SparrowError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, model_id, created_at, updated_at FROM chat_sessions",
        )?;
        let shells = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut sessions = HashMap::with_capacity(shells.len());
        for mut session in shells {
            session.messages = self.messages(&session.id)?;
            sessions.insert(session.id.clone(), session);
        }
        Ok(sessions)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>, SparrowError> {
        let shell = self
            .conn
            .query_row(
                "SELECT id, title, model_id, created_at, updated_at
                 FROM chat_sessions WHERE id = ?1",
                [id],
                session_from_row,
            )
            .optional()?;
        match shell {
            Some(mut session) => {
                session.messages = self.messages(id)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn require_session(&self, id: &str) -> Result<(), SparrowError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chat_sessions WHERE id = ?1)",
            [id],
            |r| r.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(SparrowError::SessionNotFound { id: id.to_string() })
        }
    }

    /// Insert or fully replace a session, messages included.
    pub fn save_session(&self, session: &Session) -> Result<(), SparrowError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO chat_sessions (id, title, model_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET title = ?2, model_id = ?3, updated_at = ?5",
            params![
                session.id,
                session.title,
                session.model_id,
                session.created_at,
                session.updated_at
            ],
        )?;
        tx.execute(
            "DELETE FROM chat_messages WHERE session_id = ?1",
            [&session.id],
        )?;
        for (seq, m) in session.messages.iter().enumerate() {
            tx.execute(
                "INSERT INTO chat_messages
                 (id, session_id, seq, role, content, created_at, tokens_per_second, is_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    m.id,
                    session.id,
                    seq as i64,
                    m.role.as_str(),
                    m.content,
                    m.created_at,
                    m.tokens_per_second,
                    m.is_error
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn update_session(
        &self,
        id: &str,
        title: Option<&str>,
        model_id: Option<&str>,
    ) -> Result<Session, SparrowError> {
        self.require_session(id)?;
        let now = Utc::now().timestamp_millis();
        self.conn.execute(
            "UPDATE chat_sessions SET title = COALESCE(?1, title),
             model_id = COALESCE(?2, model_id), updated_at = ?3
             WHERE id = ?4",
            params![title, model_id, now, id],
        )?;
        self.get_session(id)?
            .ok_or_else(|| SparrowError::SessionNotFound { id: id.to_string() })
    }

    pub fn delete_session(&self, id: &str) -> Result<(), SparrowError> {
        self.require_session(id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM chat_messages WHERE session_id = ?1", [id])?;
        tx.execute("DELETE FROM chat_sessions WHERE id = ?1", [id])?;
        tx.execute(
            "DELETE FROM app_state WHERE key = ?1 AND value = ?2",
            params![ACTIVE_SESSION_KEY, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -- Messages --

    /// Append a message; names the session after its first user message.
    pub fn append_message(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<Message, SparrowError> {
        self.require_session(session_id)?;
        let message = message.into_message();

        let tx = self.conn.unchecked_transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM chat_messages WHERE session_id = ?1",
            [session_id],
            |r| r.get(0),
        )?;
        tx.execute(
            "INSERT INTO chat_messages
             (id, session_id, seq, role, content, created_at, tokens_per_second, is_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id,
                session_id,
                seq,
                message.role.as_str(),
                message.content,
                message.created_at,
                message.tokens_per_second,
                message.is_error
            ],
        )?;

        let current_title: String = tx.query_row(
            "SELECT title FROM chat_sessions WHERE id = ?1",
            [session_id],
            |r| r.get(0),
        )?;
        let title = if message.role == Role::User
            && current_title == crate::chat::types::PLACEHOLDER_TITLE
        {
            generate_chat_title(&message.content)
        } else {
            current_title
        };
        tx.execute(
            "UPDATE chat_sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, message.created_at, session_id],
        )?;
        tx.commit()?;

        Ok(message)
    }

    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>, SparrowError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, created_at, tokens_per_second, is_error
             FROM chat_messages WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([session_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Messages to replay to the model: errors are UI artifacts, not turns.
    pub fn conversation_history(&self, session_id: &str) -> Result<Vec<Message>, SparrowError> {
        self.require_session(session_id)?;
        Ok(self
            .messages(session_id)?
            .into_iter()
            .filter(|m| !m.is_error)
            .collect())
    }

    // -- Active session --

    pub fn set_active_session(&self, id: Option<&str>) -> Result<(), SparrowError> {
        match id {
            Some(id) => {
                self.require_session(id)?;
                self.conn.execute(
                    "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = ?2",
                    params![ACTIVE_SESSION_KEY, id],
                )?;
            }
            None => {
                self.conn.execute(
                    "DELETE FROM app_state WHERE key = ?1",
                    [ACTIVE_SESSION_KEY],
                )?;
            }
        }
        Ok(())
    }

    pub fn active_session_id(&self) -> Result<Option<String>, SparrowError> {
        let id = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                [ACTIVE_SESSION_KEY],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        model_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        messages: Vec::new(),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(1)?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(1, "role".into(), rusqlite::types::Type::Text)
    })?;
    Ok(Message {
        id: row.get(0)?,
        role,
        content: row.get(2)?,
        created_at: row.get(3)?,
        is_streaming: false,
        tokens_per_second: row.get(4)?,
        is_error: row.get(5)?,
    })
}
