// src/cli/sessions.rs — `sparrow sessions` subcommands

use chrono::{Local, TimeZone};

use super::render::render_message;
use super::SessionsAction;
use crate::backend::store::SessionStore;
use crate::chat::types::Session;

pub fn run_sessions(action: SessionsAction, store: &SessionStore) -> anyhow::Result<()> {
    match action {
        SessionsAction::List => {
            let active = store.active_session_id()?;
            let sessions = sorted(store.list_sessions()?.into_values().collect());
            if sessions.is_empty() {
                println!("No chat sessions yet. Start one with `sparrow chat`.");
                return Ok(());
            }
            for s in &sessions {
                let marker = if active.as_deref() == Some(s.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}", summary_line(s));
            }
        }
        SessionsAction::Show { id } => {
            let Some(session) = store.get_session(&id)? else {
                anyhow::bail!("No session with id '{id}'. Run `sparrow sessions list`.");
            };
            println!("{}", session.title);
            for m in &session.messages {
                println!("\n{}", render_message(m));
            }
        }
        SessionsAction::Delete { id } => {
            if store.get_session(&id)?.is_none() {
                anyhow::bail!("No session with id '{id}'.");
            }
            store.delete_session(&id)?;
            println!("Deleted session {id}");
        }
    }
    Ok(())
}

/// Most recently updated first.
pub fn sorted(mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sessions
}

pub fn summary_line(session: &Session) -> String {
    let when = Local
        .timestamp_millis_opt(session.updated_at)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{}  {}  {} ({} messages)",
        session.id,
        when,
        session.title,
        session.messages.len()
    )
}
