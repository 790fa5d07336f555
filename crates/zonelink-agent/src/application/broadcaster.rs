//! Group-list change notification.
//!
//! The [`ChangeBroadcaster`] keeps an ordered set of [`GroupListener`]s and
//! hands each of them the current group list whenever discovery settles.
//! A listener that fails (closed channel, full buffer) is logged and skipped;
//! it never prevents delivery to the listeners after it.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use zonelink_core::GroupSummary;

/// Event name carried with every group-list notification.
pub const GROUPS_EVENT: &str = "groups";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// The receiving side has gone away.
    #[error("listener closed")]
    Closed,
    /// The receiver is not keeping up; this notification was dropped.
    #[error("listener queue full")]
    Full,
}

/// Anything that can receive a named event with the group list as payload.
#[cfg_attr(test, mockall::automock)]
pub trait GroupListener: Send + Sync {
    fn send(&self, event: &str, groups: &[GroupSummary]) -> Result<(), ListenerError>;
}

/// Ordered, identity-deduplicated set of listeners.
#[derive(Default)]
pub struct ChangeBroadcaster {
    listeners: Mutex<Vec<Arc<dyn GroupListener>>>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` unless that same instance is already subscribed.
    ///
    /// Returns `true` if it was added.
    pub fn subscribe(&self, listener: Arc<dyn GroupListener>) -> bool {
        let mut listeners = lock(&self.listeners);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Removes `listener` if present.  Returns `true` if it was removed.
    pub fn unsubscribe(&self, listener: &Arc<dyn GroupListener>) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Delivers `groups` to every listener in subscription order.
    ///
    /// Returns the number of successful deliveries.  The listener set is
    /// snapshotted first so a listener may subscribe others from inside
    /// `send` without deadlocking.
    pub fn notify(&self, groups: &[GroupSummary]) -> usize {
        let snapshot: Vec<Arc<dyn GroupListener>> = lock(&self.listeners).clone();
        let mut delivered = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            match listener.send(GROUPS_EVENT, groups) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(listener = index, "group list delivery failed: {e}"),
            }
        }
        delivered
    }
}

/// Compares the data pointers only; two `Arc<dyn _>` to the same object may
/// carry different vtable pointers.
fn same_listener(a: &Arc<dyn GroupListener>, b: &Arc<dyn GroupListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicking listener cannot leave the Vec half-updated.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forwards group lists into a bounded `mpsc` channel without blocking.
///
/// Used by the CLI's `watch` command; any async consumer can read the
/// receiver at its own pace.
pub struct ChannelListener {
    tx: mpsc::Sender<Vec<GroupSummary>>,
}

impl ChannelListener {
    /// Creates a listener and the receiver it feeds.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Vec<GroupSummary>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

impl GroupListener for ChannelListener {
    fn send(&self, _event: &str, groups: &[GroupSummary]) -> Result<(), ListenerError> {
        self.tx.try_send(groups.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ListenerError::Full,
            mpsc::error::TrySendError::Closed(_) => ListenerError::Closed,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
