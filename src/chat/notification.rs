// src/chat/notification.rs — User-facing notifications

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub detail: String,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.title)
        } else {
            write!(f, "{}: {}", self.title, self.detail)
        }
    }
}

/// Sending side held by the chat view. A dropped receiver is tolerated.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, level: NotificationLevel, title: &str, detail: impl std::fmt::Display) {
        let notification = Notification {
            level,
            title: title.to_string(),
            detail: detail.to_string(),
        };
        if self.tx.send(notification).is_err() {
            tracing::debug!(title, "notification dropped: no receiver");
        }
    }

    pub fn warn(&self, title: &str, detail: impl std::fmt::Display) {
        self.notify(NotificationLevel::Warning, title, detail);
    }

    pub fn error(&self, title: &str, detail: impl std::fmt::Display) {
        self.notify(NotificationLevel::Error, title, detail);
    }
}
