//! Per-key intent tracking and debounce bookkeeping.
//!
//! The scheduler never sleeps or spawns; the engine owns the timers and
//! reports back through [`Scheduler::arm`], [`Scheduler::expire`] and
//! [`Scheduler::complete`]. What the scheduler guarantees:
//!
//! - only the latest intent for a key is ever dispatched
//! - at most one call per key is outstanding; an intent whose timer fires
//!   while a call is in flight waits for that call to resolve
//! - keys are independent of each other

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cartsync_core::{ItemKey, RemoteChange};
use tokio::task::AbortHandle;
use tracing::debug;

/// The latest requested state for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationIntent {
    pub key: ItemKey,
    pub change: RemoteChange,
    /// Engine-wide issue order.
    pub seq: u64,
    pub issued_at: Instant,
}

/// What to do when a debounce timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// Send this intent now.
    Dispatch(MutationIntent),
    /// A newer intent replaced the one this timer was armed for.
    Superseded,
    /// A call for the key is still in flight; the intent goes out when it resolves.
    Deferred,
}

#[derive(Debug, Default)]
struct KeySchedule {
    pending: Option<MutationIntent>,
    timer: Option<AbortHandle>,
    /// The pending intent's timer already fired.
    due: bool,
    in_flight: Option<u64>,
    latest_seq: u64,
}

impl KeySchedule {
    const fn is_idle(&self) -> bool {
        self.pending.is_none() && self.in_flight.is_none()
    }
}

/// Debounce and ordering state for every key with outstanding work.
#[derive(Debug)]
pub struct Scheduler {
    debounce: Duration,
    remove_delay: Duration,
    next_seq: u64,
    keys: HashMap<ItemKey, KeySchedule>,
}

impl Scheduler {
    #[must_use]
    pub fn new(debounce: Duration, remove_delay: Duration) -> Self {
        Self {
            debounce,
            remove_delay,
            next_seq: 0,
            keys: HashMap::new(),
        }
    }

    /// Record a new intent for `key`, superseding any unsent one.
    ///
    /// Returns the intent and how long its timer should wait.
    pub fn issue(&mut self, key: &ItemKey, change: RemoteChange) -> (MutationIntent, Duration) {
        self.next_seq += 1;
        let intent = MutationIntent {
            key: key.clone(),
            change,
            seq: self.next_seq,
            issued_at: Instant::now(),
        };

        let schedule = self.keys.entry(key.clone()).or_default();
        if let Some(timer) = schedule.timer.take() {
            timer.abort();
        }
        if let Some(stale) = schedule.pending.replace(intent.clone()) {
            debug!(%key, stale_seq = stale.seq, seq = intent.seq, "Coalesced intent");
        }
        schedule.due = false;
        schedule.latest_seq = intent.seq;

        let delay = match change {
            RemoteChange::Set(_) => self.debounce,
            RemoteChange::Remove => self.remove_delay,
        };
        (intent, delay)
    }

    /// Attach the timer task for intent `seq`.
    pub fn arm(&mut self, key: &ItemKey, seq: u64, timer: AbortHandle) {
        match self.keys.get_mut(key) {
            Some(schedule) if schedule.pending.as_ref().is_some_and(|p| p.seq == seq) => {
                schedule.timer = Some(timer);
            }
            _ => timer.abort(),
        }
    }

    /// The timer armed for intent `seq` fired.
    pub fn expire(&mut self, key: &ItemKey, seq: u64) -> Expiry {
        let Some(schedule) = self.keys.get_mut(key) else {
            return Expiry::Superseded;
        };
        if schedule.pending.as_ref().is_none_or(|p| p.seq != seq) {
            return Expiry::Superseded;
        }

        schedule.timer = None;
        if schedule.in_flight.is_some() {
            schedule.due = true;
            debug!(%key, seq, "Deferred behind in-flight call");
            return Expiry::Deferred;
        }

        schedule.due = false;
        schedule.in_flight = Some(seq);
        schedule.pending.take().map_or(Expiry::Superseded, Expiry::Dispatch)
    }

    /// The call for intent `seq` resolved. Returns a deferred intent that
    /// should be dispatched next, if any.
    pub fn complete(&mut self, key: &ItemKey, seq: u64) -> Option<MutationIntent> {
        let schedule = self.keys.get_mut(key)?;
        if schedule.in_flight != Some(seq) {
            return None;
        }
        schedule.in_flight = None;

        let next = if schedule.due {
            schedule.due = false;
            schedule.pending.take()
        } else {
            None
        };
        if let Some(intent) = &next {
            schedule.in_flight = Some(intent.seq);
        }
        if schedule.is_idle() {
            self.keys.remove(key);
        }
        next
    }

    /// Whether `seq` is the most recently issued intent for `key`.
    #[must_use]
    pub fn is_latest(&self, key: &ItemKey, seq: u64) -> bool {
        self.keys
            .get(key)
            .is_some_and(|schedule| schedule.latest_seq == seq)
    }

    /// Drop the unsent intent for `key` and stop its timer. An in-flight call
    /// is left alone; its result is still reconciled.
    pub fn cancel(&mut self, key: &ItemKey) {
        if let Some(schedule) = self.keys.get_mut(key) {
            if let Some(timer) = schedule.timer.take() {
                timer.abort();
            }
            schedule.pending = None;
            schedule.due = false;
            if schedule.is_idle() {
                self.keys.remove(key);
            }
        }
    }

    /// Drop every unsent intent and stop its timer. Keys with a call in
    /// flight keep their slot and latest sequence number, so a new intent
    /// still waits behind the call and its result is judged against it.
    pub fn cancel_pending(&mut self) {
        for schedule in self.keys.values_mut() {
            if let Some(timer) = schedule.timer.take() {
                timer.abort();
            }
            schedule.pending = None;
            schedule.due = false;
        }
        self.keys.retain(|_, schedule| !schedule.is_idle());
    }

    /// Forget every key, aborting all timers.
    pub fn cancel_all(&mut self) {
        for schedule in self.keys.values_mut() {
            if let Some(timer) = schedule.timer.take() {
                timer.abort();
            }
        }
        self.keys.clear();
    }

    /// Number of keys with an unsent intent or an in-flight call.
    #[must_use]
    pub fn busy_keys(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(Duration::from_millis(300), Duration::ZERO)
    }

    #[test]
    fn test_latest_intent_wins() {
        let mut scheduler = scheduler();
        let key = ItemKey::from("p1");
        let (first, _) = scheduler.issue(&key, RemoteChange::Set(2));
        let (_, _) = scheduler.issue(&key, RemoteChange::Set(3));
        let (last, delay) = scheduler.issue(&key, RemoteChange::Set(1));
        assert_eq!(delay, Duration::from_millis(300));

        assert_eq!(scheduler.expire(&key, first.seq), Expiry::Superseded);
        assert_eq!(
            scheduler.expire(&key, last.seq),
            Expiry::Dispatch(last.clone())
        );
        assert!(scheduler.is_latest(&key, last.seq));
    }

    #[test]
    fn test_remove_uses_remove_delay() {
        let mut scheduler = scheduler();
        let (_, delay) = scheduler.issue(&ItemKey::from("p1"), RemoteChange::Remove);
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_due_intent_waits_for_in_flight_call() {
        let mut scheduler = scheduler();
        let key = ItemKey::from("p1");
        let (a, _) = scheduler.issue(&key, RemoteChange::Set(3));
        assert!(matches!(scheduler.expire(&key, a.seq), Expiry::Dispatch(_)));

        let (b, _) = scheduler.issue(&key, RemoteChange::Set(5));
        assert!(!scheduler.is_latest(&key, a.seq));
        assert_eq!(scheduler.expire(&key, b.seq), Expiry::Deferred);

        let next = scheduler.complete(&key, a.seq).unwrap();
        assert_eq!(next.change, RemoteChange::Set(5));
        assert!(scheduler.complete(&key, b.seq).is_none());
        assert_eq!(scheduler.busy_keys(), 0);
    }

    #[test]
    fn test_pending_timer_not_due_is_left_to_fire() {
        let mut scheduler = scheduler();
        let key = ItemKey::from("p1");
        let (a, _) = scheduler.issue(&key, RemoteChange::Set(3));
        scheduler.expire(&key, a.seq);
        let (b, _) = scheduler.issue(&key, RemoteChange::Set(4));

        assert!(scheduler.complete(&key, a.seq).is_none());
        assert_eq!(scheduler.busy_keys(), 1);
        assert!(matches!(scheduler.expire(&key, b.seq), Expiry::Dispatch(_)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut scheduler = scheduler();
        let (a, _) = scheduler.issue(&ItemKey::from("p1"), RemoteChange::Set(1));
        let (b, _) = scheduler.issue(&ItemKey::from("p2"), RemoteChange::Set(1));
        assert!(matches!(scheduler.expire(&a.key, a.seq), Expiry::Dispatch(_)));
        assert!(matches!(scheduler.expire(&b.key, b.seq), Expiry::Dispatch(_)));
        assert_eq!(scheduler.busy_keys(), 2);
    }

    #[test]
    fn test_cancel_keeps_in_flight_tracking() {
        let mut scheduler = scheduler();
        let key = ItemKey::from("p1");
        let (a, _) = scheduler.issue(&key, RemoteChange::Set(3));
        scheduler.expire(&key, a.seq);
        scheduler.issue(&key, RemoteChange::Set(4));

        scheduler.cancel(&key);
        assert_eq!(scheduler.busy_keys(), 1);
        assert!(scheduler.complete(&key, a.seq).is_none());
        assert_eq!(scheduler.busy_keys(), 0);
    }

    #[test]
    fn test_cancel_pending_keeps_calls_on_the_wire() {
        let mut scheduler = scheduler();
        let busy = ItemKey::from("p1");
        let idle = ItemKey::from("p2");
        let (a, _) = scheduler.issue(&busy, RemoteChange::Set(3));
        scheduler.expire(&busy, a.seq);
        scheduler.issue(&idle, RemoteChange::Set(1));

        scheduler.cancel_pending();
        assert_eq!(scheduler.busy_keys(), 1);
        assert!(scheduler.is_latest(&busy, a.seq));

        // A re-add queues behind the call still on the wire
        let (b, _) = scheduler.issue(&busy, RemoteChange::Set(1));
        assert_eq!(scheduler.expire(&busy, b.seq), Expiry::Deferred);
        assert!(!scheduler.is_latest(&busy, a.seq));
        assert_eq!(scheduler.complete(&busy, a.seq).unwrap().seq, b.seq);
    }
}
