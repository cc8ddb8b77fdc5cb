//! Change and outcome notifications.
//!
//! Listeners receive every [`EngineEvent`]: a [`EngineEvent::Changed`] after
//! each cache or totals change, and a [`EngineEvent::Notice`] for outcomes a
//! caller would surface as a toast. Notices never carry retry logic.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cartsync_core::ItemKey;
use tokio::sync::Notify;

use crate::engine::CartSnapshot;
use crate::error::{CouponIssue, SyncError};

/// Outcome of a mutation, coupon, or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The server confirmed the latest intent for `key`.
    Synced { key: ItemKey, version: u64 },
    /// The server confirmed removal of `key`.
    Removed { key: ItemKey },
    /// A mutation was refused before touching the cache or network.
    Rejected {
        key: Option<ItemKey>,
        error: SyncError,
    },
    /// A dispatched mutation failed. `rolled_back` is false when a newer
    /// intent for the key was already pending and the cache kept showing it.
    SyncFailed {
        key: ItemKey,
        error: SyncError,
        rolled_back: bool,
    },
    /// A coupon was found and is now active.
    CouponApplied { code: String, applicable: bool },
    /// A coupon lookup failed or found nothing.
    CouponRejected { code: String, error: SyncError },
    /// The active coupon stopped applying after a cache change.
    CouponStale { code: String, issue: CouponIssue },
    CouponCleared,
    /// A full refresh replaced the cache.
    Refreshed { entries: usize },
    RefreshFailed { error: SyncError },
}

impl Notification {
    /// Whether the notice reports something the caller asked for going wrong.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. }
                | Self::SyncFailed { .. }
                | Self::CouponRejected { .. }
                | Self::CouponStale { .. }
                | Self::RefreshFailed { .. }
        )
    }

    /// The error behind a failure notice. A stale coupon is reported as
    /// [`SyncError::StaleCoupon`].
    #[must_use]
    pub fn error(&self) -> Option<SyncError> {
        match self {
            Self::Rejected { error, .. }
            | Self::SyncFailed { error, .. }
            | Self::CouponRejected { error, .. }
            | Self::RefreshFailed { error } => Some(error.clone()),
            Self::CouponStale { code, issue } => Some(SyncError::StaleCoupon {
                code: code.clone(),
                reason: issue.clone(),
            }),
            Self::Synced { .. }
            | Self::Removed { .. }
            | Self::CouponApplied { .. }
            | Self::CouponCleared
            | Self::Refreshed { .. } => None,
        }
    }
}

/// Everything a listener can observe.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Changed(Arc<CartSnapshot>),
    Notice(Notification),
}

pub type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Events waiting for delivery, in the order the engine produced them.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<EngineEvent>,
    /// A caller is currently delivering the queue.
    draining: bool,
}

/// Registered listeners, keyed by subscription id.
///
/// Delivery goes through one ordered outbox. The engine enqueues while it
/// still holds its state lock, so the queue order is the order in which
/// changes happened, and only one caller at a time hands queued events to
/// listeners.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    outbox: Mutex<Outbox>,
    idle: Notify,
}

impl ListenerRegistry {
    pub(crate) fn subscribe(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every listener and every undelivered event.
    pub(crate) fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.outbox().queue.clear();
    }

    /// Queue `events` behind everything queued before them.
    pub(crate) fn enqueue(&self, events: impl IntoIterator<Item = EngineEvent>) {
        self.outbox().queue.extend(events);
    }

    /// Deliver queued events to every listener, oldest first.
    ///
    /// Returns at once when another caller is already delivering; that caller
    /// picks up whatever was queued. Listeners run outside every lock, so they
    /// may subscribe, unsubscribe, or call back into the engine.
    pub(crate) fn flush(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let next = {
                let mut outbox = self.outbox();
                let next = outbox.queue.pop_front();
                if next.is_none() {
                    outbox.draining = false;
                }
                next
            };
            let Some(event) = next else {
                break;
            };

            let listeners: Vec<Listener> = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for listener in &listeners {
                listener(&event);
            }
        }
        self.idle.notify_waiters();
    }

    /// Wait until every queued event has been delivered.
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            {
                let outbox = self.outbox();
                if !outbox.draining && outbox.queue.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Stop receiving events.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
