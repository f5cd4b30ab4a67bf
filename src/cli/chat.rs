// src/cli/chat.rs — Interactive REPL

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::render::{render_message, render_parts};
use super::sessions::summary_line;
use crate::backend::ChatBackend;
use crate::chat::segment::ContentPart;
use crate::chat::subscription::TokenChannel;
use crate::chat::view::segments;
use crate::chat::{ChatView, Notification, NotificationLevel};
use crate::infra::config::Config;

/// Run the interactive chat REPL.
pub async fn run_chat(
    backend: Arc<dyn ChatBackend>,
    channel: TokenChannel,
    config: &Config,
) -> anyhow::Result<()> {
    let (mut view, mut notifications) = ChatView::new(backend, channel, config);
    view.mount().await?;
    drain_notifications(&mut notifications);

    eprintln!(
        "sparrow v{} | {} | {} | type /help for commands\n",
        env!("CARGO_PKG_VERSION"),
        config.server.base_url,
        config.server.model.as_deref().unwrap_or("no model loaded"),
    );

    if let Some(session) = view.active_session().await {
        eprintln!("Resuming \"{}\" ({} messages)", session.title, session.messages.len());
    }

    while let Some(input) = read_input() {
        let trimmed = input.trim();

        if trimmed == "quit" || trimmed == "exit" || trimmed == "/quit" {
            break;
        }

        if trimmed.starts_with('/') {
            handle_slash_command(trimmed, &mut view).await;
            drain_notifications(&mut notifications);
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        if view.submit(trimmed).await.is_err() {
            drain_notifications(&mut notifications);
            continue;
        }

        let report = view
            .run_until_finished(|token| {
                print!("{token}");
                std::io::stdout().flush().ok();
            })
            .await;
        println!();

        if let Some(report) = report {
            let message = view
                .reconciler()
                .session(&report.session_id)
                .await
                .and_then(|s| s.messages.into_iter().find(|m| m.id == report.message_id));
            if let Some(message) = message {
                let parts = segments(&message);
                // Plain text was already shown as it streamed.
                let plain = matches!(parts.as_slice(), [ContentPart::Text { .. }]);
                if !parts.is_empty() && !plain {
                    println!("\n{}", render_parts(&parts));
                }
            }
            if let Some(tps) = report.tokens_per_second {
                eprintln!("  [{} tokens, {tps:.1} tok/s]", report.token_count);
            }
        }
        drain_notifications(&mut notifications);
    }

    view.unmount().await;
    Ok(())
}

fn read_input() -> Option<String> {
    use std::io::{self, BufRead};

    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(0) => None, // EOF
        Ok(_) => Some(line),
        Err(_) => None,
    }
}

fn drain_notifications(rx: &mut mpsc::UnboundedReceiver<Notification>) {
    while let Ok(n) = rx.try_recv() {
        let tag = match n.level {
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        eprintln!("  {tag}: {n}");
    }
}

async fn handle_slash_command(input: &str, view: &mut ChatView) {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd {
        "/new" => {
            if view.new_chat().await.is_ok() {
                eprintln!("  Started a new chat.");
            }
        }

        "/sessions" => {
            let active = view.reconciler().active_session_id().await;
            for s in view.sessions().await {
                let marker = if active.as_deref() == Some(s.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                eprintln!("  {marker} {}", summary_line(&s));
            }
        }

        "/switch" => {
            if arg.is_empty() {
                eprintln!("  Usage: /switch <session-id>");
                return;
            }
            if let Ok(session) = view.switch_session(arg).await {
                eprintln!("  Switched to \"{}\"", session.title);
                for m in &session.messages {
                    println!("{}\n", render_message(m));
                }
            }
        }

        "/delete" => {
            let target = if arg.is_empty() {
                view.reconciler().active_session_id().await
            } else {
                Some(arg.to_string())
            };
            let Some(target) = target else {
                eprintln!("  No session to delete.");
                return;
            };
            match view.delete_session(&target).await {
                Ok(()) => eprintln!("  Deleted {target}"),
                Err(e) => eprintln!("  {e}"),
            }
        }

        "/rename" => {
            if arg.is_empty() {
                eprintln!("  Usage: /rename <title>");
                return;
            }
            let Some(id) = view.reconciler().active_session_id().await else {
                eprintln!("  No active session.");
                return;
            };
            match view.reconciler().rename_session(&id, arg).await {
                Ok(s) => eprintln!("  Renamed to \"{}\"", s.title),
                Err(e) => eprintln!("  Failed to rename: {e}"),
            }
        }

        "/model" => {
            let Some(id) = view.reconciler().active_session_id().await else {
                eprintln!("  No active session.");
                return;
            };
            if arg.is_empty() {
                let current = view
                    .reconciler()
                    .session(&id)
                    .await
                    .and_then(|s| s.model_id);
                eprintln!("  Session model: {}", current.as_deref().unwrap_or("(none)"));
                return;
            }
            match view.reconciler().set_session_model(&id, arg).await {
                Ok(_) => eprintln!("  Session model set to {arg}"),
                Err(e) => eprintln!("  Failed to set model: {e}"),
            }
        }

        "/help" => {
            eprintln!("Slash commands:");
            eprintln!("  /new               Start a new chat");
            eprintln!("  /sessions          List chat sessions");
            eprintln!("  /switch <id>       Switch to another session");
            eprintln!("  /delete [id]       Delete a session (default: current)");
            eprintln!("  /rename <title>    Rename the current session");
            eprintln!("  /model [id]        Show or record the session's model");
            eprintln!("  /help              Show this help");
            eprintln!("  /quit, quit, exit  End session");
        }

        _ => {
            eprintln!("Unknown command: {}. Type /help for commands.", cmd);
        }
    }
}
