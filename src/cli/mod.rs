// src/cli/mod.rs — CLI definition (clap derive)

pub mod chat;
pub mod render;
pub mod sessions;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sparrow", about = "Chat with a model served by a local OVMS", version)]
pub struct Cli {
    /// Model id to generate with (overrides `server.model`)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat session (default)
    Chat,
    /// Inspect or remove stored chat sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List sessions, most recent first
    List,
    /// Print every message of a session
    Show { id: String },
    /// Delete a session and its messages
    Delete { id: String },
}
