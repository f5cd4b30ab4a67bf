// src/chat/subscription.rs — Token channel and epoch-guarded subscriptions
//
// The backend pushes `chat-token` events onto a broadcast channel. The chat
// view listens through exactly one live `Subscription`. Every subscription
// closes over the epoch it was opened in; once the manager moves to a new
// epoch, older handles stop yielding events even if something still holds
// them (a remount that forgot to detach, for instance).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::types::TokenEvent;
use crate::infra::errors::SparrowError;

pub const DEFAULT_RESUBSCRIBE_GRACE: Duration = Duration::from_millis(100);

/// No epoch is live.
const NO_EPOCH: u64 = 0;

/// Sending half of the `chat-token` channel. Cheap to clone; the backend
/// keeps one to emit generation output.
#[derive(Debug, Clone)]
pub struct TokenChannel {
    tx: broadcast::Sender<TokenEvent>,
}

impl TokenChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event. Having no listener is not an error: the stream is
    /// simply abandoned.
    pub fn emit(&self, event: TokenEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("chat-token event emitted with no listener");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.tx.subscribe()
    }
}

/// A listener bound to one epoch. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    epoch: u64,
    live: Arc<AtomicU64>,
    rx: broadcast::Receiver<TokenEvent>,
    /// Events overwritten before this handle read them.
    lost: u64,
}

impl Subscription {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this handle's epoch is still the accepted one.
    pub fn is_current(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.epoch
    }

    /// Next event for this epoch. Returns `None` once the subscription has
    /// been superseded or the channel is closed; events that arrive after
    /// supersession are dropped.
    pub async fn recv(&mut self) -> Option<TokenEvent> {
        loop {
            if !self.is_current() {
                return None;
            }
            match self.rx.recv().await {
                Ok(event) => {
                    if self.is_current() {
                        return Some(event);
                    }
                    tracing::debug!(epoch = self.epoch, "dropping event from stale subscription");
                    return None;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(epoch = self.epoch, skipped, "token listener lagged behind");
                    self.lost += skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Events lost to lag since the last call. The caller decides what a
    /// gap means for the stream it was assembling.
    pub fn take_lost(&mut self) -> u64 {
        std::mem::take(&mut self.lost)
    }

    /// Explicit disposer; equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        tracing::debug!(epoch = self.epoch, "unsubscribed from chat-token");
    }
}

/// Owns the single live subscription of a chat view.
#[derive(Debug)]
pub struct SubscriptionManager {
    channel: TokenChannel,
    live: Arc<AtomicU64>,
    last_epoch: u64,
    grace: Duration,
    current: Option<Subscription>,
}

impl SubscriptionManager {
    pub fn new(channel: TokenChannel, grace: Duration) -> Self {
        Self {
            channel,
            live: Arc::new(AtomicU64::new(NO_EPOCH)),
            last_epoch: NO_EPOCH,
            grace,
            current: None,
        }
    }

    /// The accepted epoch, or 0 when nothing is subscribed.
    pub fn epoch(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_subscribed(&self) -> bool {
        self.current.is_some()
    }

    /// Tear down the current subscription and open a new epoch.
    ///
    /// Refused with `StreamInFlight` while a stream is being assembled, so
    /// the in-flight response keeps its listener.
    pub async fn resubscribe(&mut self, stream_active: bool) -> Result<u64, SparrowError> {
        if stream_active {
            tracing::debug!(epoch = self.epoch(), "resubscribe deferred: stream in flight");
            return Err(SparrowError::StreamInFlight);
        }

        self.unsubscribe();

        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        self.last_epoch += 1;
        let epoch = self.last_epoch;
        self.live.store(epoch, Ordering::Release);
        self.current = Some(Subscription {
            epoch,
            live: self.live.clone(),
            rx: self.channel.subscribe(),
            lost: 0,
        });
        tracing::debug!(epoch, "subscribed to chat-token");
        Ok(epoch)
    }

    /// Revoke every outstanding handle and drop the owned one.
    pub fn unsubscribe(&mut self) {
        self.live.store(NO_EPOCH, Ordering::Release);
        if let Some(sub) = self.current.take() {
            sub.unsubscribe();
        }
    }

    /// Next event from the live subscription; `None` when there is none.
    pub async fn recv(&mut self) -> Option<TokenEvent> {
        match self.current.as_mut() {
            Some(sub) => sub.recv().await,
            None => None,
        }
    }

    /// Events the live subscription lost to lag since the last call.
    pub fn take_lost(&mut self) -> u64 {
        self.current.as_mut().map_or(0, Subscription::take_lost)
    }

    /// Hand the live handle to the caller. The epoch stays accepted until
    /// the next `resubscribe`/`unsubscribe`.
    pub fn take_subscription(&mut self) -> Option<Subscription> {
        self.current.take()
    }
}
