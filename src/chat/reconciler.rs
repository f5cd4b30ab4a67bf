// src/chat/reconciler.rs — Local session registry kept in step with the backend
//
// A chat starts life as a temporary session that exists only in memory.
// Its first user message promotes it: the message is appended locally, the
// session is persisted, and from then on every message goes straight to the
// backend. The registry lock is held for the whole of a send, so two sends
// racing on a fresh session promote it once and land in order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::types::{Message, Session};
use crate::backend::{ChatBackend, NewMessage};
use crate::infra::errors::SparrowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Only in memory; the backend has never stored it.
    Temporary,
    /// `persist_temporary_session` is in flight.
    Promoting,
    Persisted,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Temporary => "temporary",
            Lifecycle::Promoting => "promoting",
            Lifecycle::Persisted => "persisted",
        }
    }
}

/// Result of sending a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    /// Canonical id of the session the message went to.
    pub session_id: String,
    pub message: Message,
    /// This send promoted a temporary session.
    pub promoted: bool,
}

#[derive(Debug)]
struct Entry {
    session: Session,
    lifecycle: Lifecycle,
}

#[derive(Debug, Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    active: Option<String>,
}

impl Registry {
    fn entry(&self, id: &str) -> Result<&Entry, SparrowError> {
        self.entries
            .get(id)
            .ok_or_else(|| SparrowError::SessionNotFound { id: id.to_string() })
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, SparrowError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| SparrowError::SessionNotFound { id: id.to_string() })
    }

    /// Forget the active session if it is a temporary one nobody wrote in.
    fn discard_unused_temporary(&mut self, keep: Option<&str>) {
        let Some(active) = self.active.clone() else {
            return;
        };
        if keep == Some(active.as_str()) {
            return;
        }
        let unused = self.entries.get(&active).is_some_and(|e| {
            e.lifecycle == Lifecycle::Temporary && e.session.messages.is_empty()
        });
        if unused {
            self.entries.remove(&active);
            self.active = None;
            tracing::debug!(session_id = %active, "discarded unused temporary session");
        }
    }
}

pub struct SessionReconciler {
    backend: Arc<dyn ChatBackend>,
    registry: Mutex<Registry>,
}

impl SessionReconciler {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Pull the stored sessions and the backend's notion of the active one.
    /// Temporary sessions already in the registry are kept.
    pub async fn load(&self) -> Result<usize, SparrowError> {
        let snapshot = self.backend.get_chat_sessions().await?;
        let mut reg = self.registry.lock().await;

        let count = snapshot.sessions.len();
        for (id, session) in snapshot.sessions {
            reg.entries.insert(
                id,
                Entry {
                    session,
                    lifecycle: Lifecycle::Persisted,
                },
            );
        }
        if let Some(active) = snapshot.active_session_id {
            if reg.entries.contains_key(&active) {
                reg.active = Some(active);
            }
        }
        tracing::debug!(count, "loaded chat sessions");
        Ok(count)
    }

    /// The active session, creating a temporary one if there is none.
    pub async fn ensure_active_session(&self) -> Result<Session, SparrowError> {
        let mut reg = self.registry.lock().await;
        let id = self.ensure_active_locked(&mut reg).await?;
        Ok(reg.entry(&id)?.session.clone())
    }

    async fn ensure_active_locked(&self, reg: &mut Registry) -> Result<String, SparrowError> {
        if let Some(id) = reg.active.as_ref() {
            if reg.entries.contains_key(id) {
                return Ok(id.clone());
            }
        }
        let session = self.backend.create_temporary_chat_session(None).await?;
        let id = session.id.clone();
        reg.entries.insert(
            id.clone(),
            Entry {
                session,
                lifecycle: Lifecycle::Temporary,
            },
        );
        reg.active = Some(id.clone());
        tracing::debug!(session_id = %id, "created temporary session");
        Ok(id)
    }

    /// Send a user message to the active session, promoting it first if it
    /// is still temporary.
    pub async fn send_message(&self, content: &str) -> Result<SendReceipt, SparrowError> {
        let mut reg = self.registry.lock().await;
        let id = self.ensure_active_locked(&mut reg).await?;
        match reg.entry(&id)?.lifecycle {
            Lifecycle::Temporary => self.first_locked(&mut reg, &id, content).await,
            Lifecycle::Persisted => self.subsequent_locked(&mut reg, &id, content).await,
            Lifecycle::Promoting => Err(SparrowError::InvalidLifecycle {
                id,
                expected: "settled",
            }),
        }
    }

    pub async fn send_first_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<SendReceipt, SparrowError> {
        let mut reg = self.registry.lock().await;
        self.first_locked(&mut reg, session_id, content).await
    }

    pub async fn send_subsequent_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<SendReceipt, SparrowError> {
        let mut reg = self.registry.lock().await;
        self.subsequent_locked(&mut reg, session_id, content).await
    }

    async fn first_locked(
        &self,
        reg: &mut Registry,
        id: &str,
        content: &str,
    ) -> Result<SendReceipt, SparrowError> {
        let entry = reg.entry_mut(id)?;
        if entry.lifecycle != Lifecycle::Temporary {
            return Err(SparrowError::InvalidLifecycle {
                id: id.to_string(),
                expected: Lifecycle::Temporary.as_str(),
            });
        }

        let (session, message) = self
            .backend
            .add_message_to_temporary_session(entry.session.clone(), NewMessage::user(content))
            .await?;
        entry.session = session;
        entry.lifecycle = Lifecycle::Promoting;
        let local = entry.session.clone();

        match self.backend.persist_temporary_session(local.clone()).await {
            Ok(mut persisted) => {
                if persisted.messages.is_empty() {
                    persisted.messages = local.messages;
                }
                let canonical = persisted.id.clone();
                reg.entries.remove(id);
                reg.entries.insert(
                    canonical.clone(),
                    Entry {
                        session: persisted,
                        lifecycle: Lifecycle::Persisted,
                    },
                );
                if reg.active.as_deref() == Some(id) {
                    reg.active = Some(canonical.clone());
                }
                tracing::info!(temporary_id = id, session_id = %canonical, "promoted session");
                Ok(SendReceipt {
                    session_id: canonical,
                    message,
                    promoted: true,
                })
            }
            Err(e) => {
                tracing::warn!(session_id = id, "Failed to persist session: {e}");
                if let Some(entry) = reg.entries.get_mut(id) {
                    entry.lifecycle = Lifecycle::Temporary;
                }
                Err(e)
            }
        }
    }

    async fn subsequent_locked(
        &self,
        reg: &mut Registry,
        id: &str,
        content: &str,
    ) -> Result<SendReceipt, SparrowError> {
        let lifecycle = reg.entry(id)?.lifecycle;
        if lifecycle != Lifecycle::Persisted {
            return Err(SparrowError::InvalidLifecycle {
                id: id.to_string(),
                expected: Lifecycle::Persisted.as_str(),
            });
        }

        let message = self
            .backend
            .add_message_to_session(id, NewMessage::user(content))
            .await?;
        let entry = reg.entry_mut(id)?;
        entry.session.updated_at = message.created_at;
        entry.session.messages.push(message.clone());

        // The backend may have renamed the session off its placeholder.
        match self.backend.get_chat_sessions().await {
            Ok(snapshot) => {
                if let (Some(fresh), Some(entry)) =
                    (snapshot.sessions.get(id), reg.entries.get_mut(id))
                {
                    entry.session.title = fresh.title.clone();
                    entry.session.model_id = fresh.model_id.clone();
                    entry.session.updated_at = fresh.updated_at;
                }
            }
            Err(e) => tracing::warn!(session_id = id, "Failed to refresh session metadata: {e}"),
        }

        Ok(SendReceipt {
            session_id: id.to_string(),
            message,
            promoted: false,
        })
    }

    /// Append an error reply. Persisted sessions store it with `is_error`;
    /// temporary ones keep it in memory only.
    pub async fn record_error(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<Message, SparrowError> {
        let mut reg = self.registry.lock().await;
        let lifecycle = reg.entry(session_id)?.lifecycle;

        let message = if lifecycle == Lifecycle::Persisted {
            match self
                .backend
                .add_message_to_session(session_id, NewMessage::error(content))
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(session_id, "Failed to save error message: {e}");
                    Message::error(content)
                }
            }
        } else {
            Message::error(content)
        };

        reg.entry_mut(session_id)?.session.messages.push(message.clone());
        Ok(message)
    }

    /// Run `f` on a session's message list. `None` if the session is gone.
    pub async fn with_messages_mut<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Vec<Message>) -> R,
    ) -> Option<R> {
        let mut reg = self.registry.lock().await;
        reg.entries
            .get_mut(session_id)
            .map(|e| f(&mut e.session.messages))
    }

    pub async fn update_message<R>(
        &self,
        session_id: &str,
        message_id: &str,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        let mut reg = self.registry.lock().await;
        reg.entries
            .get_mut(session_id)
            .and_then(|e| e.session.message_mut(message_id))
            .map(f)
    }

    /// Swap a locally minted message id for the one the backend assigned.
    pub async fn replace_message_id(&self, session_id: &str, old_id: &str, new_id: &str) -> bool {
        self.update_message(session_id, old_id, |m| m.id = new_id.to_string())
            .await
            .is_some()
    }

    pub async fn lifecycle(&self, session_id: &str) -> Option<Lifecycle> {
        let reg = self.registry.lock().await;
        reg.entries.get(session_id).map(|e| e.lifecycle)
    }

    pub async fn active_session_id(&self) -> Option<String> {
        self.registry.lock().await.active.clone()
    }

    pub async fn active_session(&self) -> Option<Session> {
        let reg = self.registry.lock().await;
        let id = reg.active.as_ref()?;
        reg.entries.get(id).map(|e| e.session.clone())
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        let reg = self.registry.lock().await;
        reg.entries.get(session_id).map(|e| e.session.clone())
    }

    /// All known sessions, most recently updated first.
    pub async fn sessions(&self) -> Vec<Session> {
        let reg = self.registry.lock().await;
        let mut sessions: Vec<Session> = reg.entries.values().map(|e| e.session.clone()).collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Make `session_id` active, loading its messages on first visit.
    pub async fn switch_session(&self, session_id: &str) -> Result<Session, SparrowError> {
        let mut reg = self.registry.lock().await;
        let lifecycle = reg.entry(session_id)?.lifecycle;

        if lifecycle == Lifecycle::Persisted {
            self.backend.set_active_chat_session(session_id).await?;
            if reg.entry(session_id)?.session.messages.is_empty() {
                match self.backend.get_session_messages(session_id).await {
                    Ok(messages) => reg.entry_mut(session_id)?.session.messages = messages,
                    Err(e) => tracing::warn!(session_id, "Failed to load messages: {e}"),
                }
            }
        }

        reg.discard_unused_temporary(Some(session_id));
        reg.active = Some(session_id.to_string());
        Ok(reg.entry(session_id)?.session.clone())
    }

    /// Start over with a fresh temporary session.
    pub async fn new_chat(&self) -> Result<Session, SparrowError> {
        let mut reg = self.registry.lock().await;
        reg.discard_unused_temporary(None);
        reg.active = None;
        let id = self.ensure_active_locked(&mut reg).await?;
        Ok(reg.entry(&id)?.session.clone())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), SparrowError> {
        let mut reg = self.registry.lock().await;
        if reg.entry(session_id)?.lifecycle == Lifecycle::Persisted {
            self.backend.delete_chat_session(session_id).await?;
        }
        reg.entries.remove(session_id);
        if reg.active.as_deref() == Some(session_id) {
            reg.active = None;
        }
        tracing::info!(session_id, "deleted session");
        Ok(())
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session, SparrowError> {
        self.update_metadata(session_id, Some(title.to_string()), None)
            .await
    }

    pub async fn set_session_model(
        &self,
        session_id: &str,
        model_id: &str,
    ) -> Result<Session, SparrowError> {
        self.update_metadata(session_id, None, Some(model_id.to_string()))
            .await
    }

    async fn update_metadata(
        &self,
        session_id: &str,
        title: Option<String>,
        model_id: Option<String>,
    ) -> Result<Session, SparrowError> {
        let mut reg = self.registry.lock().await;
        let lifecycle = reg.entry(session_id)?.lifecycle;

        let updated = if lifecycle == Lifecycle::Persisted {
            Some(
                self.backend
                    .update_chat_session(session_id, title.clone(), model_id.clone())
                    .await?,
            )
        } else {
            None
        };

        let entry = reg.entry_mut(session_id)?;
        match updated {
            Some(fresh) => {
                entry.session.title = fresh.title;
                entry.session.model_id = fresh.model_id;
                entry.session.updated_at = fresh.updated_at;
            }
            None => {
                if let Some(title) = title {
                    entry.session.title = title;
                }
                if model_id.is_some() {
                    entry.session.model_id = model_id;
                }
            }
        }
        Ok(entry.session.clone())
    }
}
