// src/chat/mod.rs — Streaming response assembly and session reconciliation

pub mod assembler;
pub mod dedup;
pub mod finalizer;
pub mod notification;
pub mod reconciler;
pub mod segment;
pub mod subscription;
pub mod types;
pub mod view;

pub use notification::{Notification, NotificationLevel};
pub use view::ChatView;
