//! The synchronization engine facade.
//!
//! [`SyncEngine`] owns one [`LocalCache`] and wires it to the scheduler,
//! reconciler, pricing, and listeners. Mutations return as soon as the cache
//! is updated; the network round trip happens on spawned Tokio tasks and its
//! outcome arrives as an [`EngineEvent`].
//!
//! All engine state sits behind one `std::sync::Mutex` that is never held
//! across an `.await` or while listeners run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cartsync_core::{CollectionKind, DiscountRule, ItemKey, ProductListing, RemoteChange};
use chrono::Utc;
use moka::future::Cache;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::auth::Credentials;
use crate::cache::{Applied, CacheEntry, LocalCache};
use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::notify::{EngineEvent, ListenerRegistry, Notification, Subscription};
use crate::pricing::{CouponEvaluation, Totals, compute_totals};
use crate::reconcile::reconcile;
use crate::remote::{RemoteError, RemoteStore};
use crate::scheduler::{Expiry, MutationIntent, Scheduler};

const COUPON_CACHE_CAPACITY: u64 = 256;

/// Read-only view of the collection handed to callers and listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub kind: CollectionKind,
    /// Visible entries in key order. Entries pending removal are omitted.
    pub entries: Vec<CacheEntry>,
    pub totals: Totals,
    /// Code of the active coupon, applicable or not.
    pub coupon_code: Option<String>,
    /// Entries waiting on the server, pending removals included.
    pub pending: usize,
}

impl CartSnapshot {
    fn empty(kind: CollectionKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            totals: Totals::default(),
            coupon_code: None,
            pending: 0,
        }
    }

    #[must_use]
    pub fn entry(&self, key: &ItemKey) -> Option<&CacheEntry> {
        self.entries.iter().find(|entry| &entry.key == key)
    }
}

struct EngineState {
    cache: LocalCache,
    scheduler: Scheduler,
    coupon: Option<DiscountRule>,
    /// Whether the active coupon applied at the last recompute.
    coupon_applicable: bool,
    snapshot: Arc<CartSnapshot>,
    /// Refreshes and coupon lookups still running.
    background: usize,
    /// Bumped per coupon apply/clear so superseded lookups are ignored.
    coupon_request: u64,
    disposed: bool,
}

impl EngineState {
    fn busy(&self) -> usize {
        self.scheduler.busy_keys() + self.background
    }
}

struct EngineInner<S> {
    store: S,
    credentials: Credentials,
    config: EngineConfig,
    state: Mutex<EngineState>,
    listeners: Arc<ListenerRegistry>,
    coupons: Cache<String, DiscountRule>,
    busy: watch::Sender<usize>,
}

/// Optimistic cart or wishlist mirror over a [`RemoteStore`].
///
/// Cloning is cheap and every clone drives the same engine. Methods that
/// start background work (`mutate`, `refresh`, `apply_coupon`, ...) must be
/// called from within a Tokio runtime.
pub struct SyncEngine<S: RemoteStore> {
    inner: Arc<EngineInner<S>>,
}

impl<S: RemoteStore> Clone for SyncEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RemoteStore> std::fmt::Debug for SyncEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SyncEngine")
            .field("kind", &state.cache.kind())
            .field("entries", &state.snapshot.entries.len())
            .field("busy", &state.busy())
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore> SyncEngine<S> {
    /// Create an engine with an empty cache. Call [`init`](Self::init) to
    /// load the remote collection.
    #[must_use]
    pub fn new(
        store: S,
        credentials: Credentials,
        config: EngineConfig,
        kind: CollectionKind,
    ) -> Self {
        let coupons = Cache::builder()
            .max_capacity(COUPON_CACHE_CAPACITY)
            .time_to_live(config.coupon_cache_ttl)
            .build();
        let (busy, _) = watch::channel(0);

        let state = EngineState {
            cache: LocalCache::new(kind),
            scheduler: Scheduler::new(config.debounce, config.remove_delay),
            coupon: None,
            coupon_applicable: false,
            snapshot: Arc::new(CartSnapshot::empty(kind)),
            background: 0,
            coupon_request: 0,
            disposed: false,
        };

        Self {
            inner: Arc::new(EngineInner {
                store,
                credentials,
                config,
                state: Mutex::new(state),
                listeners: Arc::new(ListenerRegistry::default()),
                coupons,
                busy,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Fetch the remote collection and replace the cache with it.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure, or `Disposed`.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        self.begin_background()?;
        self.reload().await.map(|_| ())
    }

    /// Stop the engine: cancel timers, drop listeners, and reject later calls.
    ///
    /// Calls already on the wire are not cancelled; their results are dropped.
    pub fn dispose(&self) {
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.scheduler.cancel_all();
            state.background = 0;
        }
        self.inner.listeners.clear();
        self.inner.busy.send_replace(0);
        info!("Sync engine disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The current view. Never blocks on the network.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CartSnapshot> {
        Arc::clone(&self.lock().snapshot)
    }

    /// Register a listener for every change and notice.
    pub fn subscribe(
        &self,
        listener: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.listeners.subscribe(Arc::new(listener))
    }

    /// Wait until no timers, remote calls, refreshes, or coupon lookups are
    /// outstanding.
    pub async fn settled(&self) {
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|count| *count == 0).await;
        self.inner.listeners.drained().await;
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of a product, creating the entry if needed.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `StockExceeded`, or `Disposed`. The cache is
    /// unchanged and a `Rejected` notice is emitted.
    #[instrument(skip(self, listing), fields(key = %listing.key))]
    pub fn add_item(&self, listing: &ProductListing, quantity: u32) -> Result<()> {
        self.apply_local(&listing.key, |cache| {
            cache
                .add(listing, quantity)
                .map(|(applied, _)| change_for(&applied))
        })
    }

    /// Set the quantity of a cached entry. Zero removes it.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `UnknownKey`, `StockExceeded`, or `Disposed`. The
    /// cache is unchanged and a `Rejected` notice is emitted.
    #[instrument(skip(self, key), fields(key = %key))]
    pub fn mutate(&self, key: &ItemKey, quantity: u32) -> Result<()> {
        self.apply_local(key, |cache| {
            cache
                .upsert(key, quantity)
                .map(|(applied, _)| change_for(&applied))
        })
    }

    /// Remove an entry.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `UnknownKey`, or `Disposed`.
    #[instrument(skip(self, key), fields(key = %key))]
    pub fn remove_item(&self, key: &ItemKey) -> Result<()> {
        self.apply_local(key, |cache| cache.remove(key).map(|_| RemoteChange::Remove))
    }

    /// Drop every local entry and all pending work. The remote collection is
    /// not touched.
    ///
    /// # Errors
    ///
    /// `Disposed`.
    pub fn clear_all(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            state.cache.clear();
            // Calls on the wire keep their slot so a re-add queues behind them
            state.scheduler.cancel_pending();
            let events = self.refresh_view(&mut state);
            self.publish_busy(&state);
            self.inner.listeners.enqueue(events);
        }
        info!("Cleared local collection");
        self.inner.listeners.flush();
        Ok(())
    }

    fn apply_local(
        &self,
        key: &ItemKey,
        op: impl FnOnce(&mut LocalCache) -> Result<RemoteChange>,
    ) -> Result<()> {
        let outcome = {
            let mut state = self.lock();
            let outcome = self
                .check_writable(&state)
                .and_then(|()| op(&mut state.cache))
                .map(|change| {
                    self.schedule(&mut state, key, change);
                    let events = self.refresh_view(&mut state);
                    self.publish_busy(&state);
                    self.inner.listeners.enqueue(events);
                });
            if let Err(error) = &outcome {
                debug!(%key, error = %error, "Mutation rejected");
                self.inner
                    .listeners
                    .enqueue([EngineEvent::Notice(Notification::Rejected {
                        key: Some(key.clone()),
                        error: error.clone(),
                    })]);
            }
            outcome
        };
        self.inner.listeners.flush();
        outcome
    }

    fn check_writable(&self, state: &EngineState) -> Result<()> {
        if state.disposed {
            return Err(SyncError::Disposed);
        }
        if !self.inner.credentials.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        Ok(())
    }

    /// Issue an intent and (re)arm its timer.
    fn schedule(&self, state: &mut EngineState, key: &ItemKey, change: RemoteChange) {
        let (intent, delay) = state.scheduler.issue(key, change);
        debug!(%key, seq = intent.seq, ?change, delay_ms = delay.as_millis(), "Intent issued");

        let engine = self.clone();
        let seq = intent.seq;
        let timer_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.on_timer(timer_key, seq).await;
        });
        state.scheduler.arm(key, seq, task.abort_handle());
    }

    async fn on_timer(self, key: ItemKey, seq: u64) {
        let expiry = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.scheduler.expire(&key, seq)
        };
        if let Expiry::Dispatch(intent) = expiry {
            self.dispatch(intent).await;
        }
    }

    /// Send `intent`, then any intent that became due while it was in flight.
    async fn dispatch(&self, mut intent: MutationIntent) {
        loop {
            let result = self.send_mutation(&intent).await;
            match self.finish_mutation(&intent, result) {
                Some(next) => intent = next,
                None => break,
            }
        }
    }

    #[instrument(skip_all, fields(key = %intent.key, seq = intent.seq, change = ?intent.change))]
    async fn send_mutation(
        &self,
        intent: &MutationIntent,
    ) -> Result<cartsync_core::MutationOutcome> {
        debug!(
            waited_ms = intent.issued_at.elapsed().as_millis(),
            "Dispatching mutation"
        );
        bounded(
            self.inner.config.request_timeout,
            self.inner.store.apply_mutation(&intent.key, intent.change),
        )
        .await
    }

    fn finish_mutation(
        &self,
        intent: &MutationIntent,
        result: Result<cartsync_core::MutationOutcome>,
    ) -> Option<MutationIntent> {
        let next = {
            let mut state = self.lock();
            if state.disposed {
                return None;
            }
            let fresh = state.scheduler.is_latest(&intent.key, intent.seq);
            let notice = reconcile(&mut state.cache, &intent.key, fresh, result);
            let next = state.scheduler.complete(&intent.key, intent.seq);

            let mut events = self.refresh_view(&mut state);
            events.extend(notice.map(EngineEvent::Notice));
            self.publish_busy(&state);
            self.inner.listeners.enqueue(events);
            next
        };
        self.inner.listeners.flush();
        next
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Start a full fetch of the remote collection in the background.
    ///
    /// Entries with a mutation outstanding keep their local state; the
    /// outcome arrives as `Refreshed` or `RefreshFailed`.
    ///
    /// # Errors
    ///
    /// `Disposed`.
    pub fn refresh(&self) -> Result<()> {
        self.begin_background()?;
        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine.reload().await;
        });
        Ok(())
    }

    fn begin_background(&self) -> Result<()> {
        let mut state = self.lock();
        if state.disposed {
            return Err(SyncError::Disposed);
        }
        state.background += 1;
        self.publish_busy(&state);
        Ok(())
    }

    /// Fetch and apply the remote collection. Expects `begin_background`.
    #[instrument(skip(self))]
    async fn reload(&self) -> Result<usize> {
        let result = bounded(
            self.inner.config.request_timeout,
            self.inner.store.fetch_collection(),
        )
        .await;

        let outcome = {
            let mut state = self.lock();
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            state.background = state.background.saturating_sub(1);

            let (notice, outcome) = match result {
                Ok(records) => {
                    let report = state.cache.replace_all(records);
                    for key in &report.settled {
                        state.scheduler.cancel(key);
                    }
                    let entries = state.cache.visible().count();
                    info!(
                        entries,
                        settled = report.settled.len(),
                        preserved = report.preserved.len(),
                        "Collection refreshed"
                    );
                    (Notification::Refreshed { entries }, Ok(entries))
                }
                Err(error) => {
                    warn!(error = %error, "Collection refresh failed");
                    (
                        Notification::RefreshFailed {
                            error: error.clone(),
                        },
                        Err(error),
                    )
                }
            };

            let mut events = self.refresh_view(&mut state);
            events.push(EngineEvent::Notice(notice));
            self.publish_busy(&state);
            self.inner.listeners.enqueue(events);
            outcome
        };
        self.inner.listeners.flush();
        outcome
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    /// Look up `code` and make it the active coupon.
    ///
    /// The lookup runs in the background; the outcome arrives as
    /// `CouponApplied` or `CouponRejected`. Applying a new code or clearing
    /// the coupon supersedes a lookup still in flight.
    ///
    /// # Errors
    ///
    /// `CouponNotFound` for a blank code, or `Disposed`.
    pub fn apply_coupon(&self, code: &str) -> Result<()> {
        let code = code.trim().to_uppercase();
        let request = {
            let mut state = self.lock();
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            if code.is_empty() {
                self.inner
                    .listeners
                    .enqueue([EngineEvent::Notice(Notification::CouponRejected {
                        code: code.clone(),
                        error: SyncError::CouponNotFound(code.clone()),
                    })]);
                None
            } else {
                state.coupon_request += 1;
                state.background += 1;
                self.publish_busy(&state);
                Some(state.coupon_request)
            }
        };
        let Some(request) = request else {
            self.inner.listeners.flush();
            return Err(SyncError::CouponNotFound(code));
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.lookup_coupon(&code).await;
            engine.finish_coupon(code, request, result);
        });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lookup_coupon(&self, code: &str) -> Result<DiscountRule> {
        if let Some(rule) = self.inner.coupons.get(code).await {
            debug!("Coupon cache hit");
            return Ok(rule);
        }

        let rule = bounded(
            self.inner.config.request_timeout,
            self.inner.store.fetch_coupon(code),
        )
        .await?
        .ok_or_else(|| SyncError::CouponNotFound(code.to_string()))?;

        self.inner
            .coupons
            .insert(code.to_string(), rule.clone())
            .await;
        Ok(rule)
    }

    fn finish_coupon(&self, code: String, request: u64, result: Result<DiscountRule>) {
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.background = state.background.saturating_sub(1);
            if state.coupon_request != request {
                debug!(%code, "Dropping superseded coupon lookup");
                self.publish_busy(&state);
                return;
            }

            let events = match result {
                Ok(rule) => {
                    state.coupon = Some(rule);
                    state.coupon_applicable = false;
                    let mut events = self.refresh_view(&mut state);
                    let applicable = state.coupon_applicable;
                    info!(%code, applicable, "Coupon applied");
                    events.push(EngineEvent::Notice(Notification::CouponApplied {
                        code,
                        applicable,
                    }));
                    events
                }
                Err(error) => {
                    warn!(%code, error = %error, "Coupon rejected");
                    vec![EngineEvent::Notice(Notification::CouponRejected {
                        code,
                        error,
                    })]
                }
            };
            self.publish_busy(&state);
            self.inner.listeners.enqueue(events);
        }
        self.inner.listeners.flush();
    }

    /// Deactivate the coupon.
    ///
    /// # Errors
    ///
    /// `Disposed`.
    pub fn clear_coupon(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            state.coupon_request += 1;
            state.coupon = None;
            state.coupon_applicable = false;
            let mut events = self.refresh_view(&mut state);
            events.push(EngineEvent::Notice(Notification::CouponCleared));
            self.inner.listeners.enqueue(events);
        }
        self.inner.listeners.flush();
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Recompute totals and the published snapshot.
    ///
    /// Returns the `Changed` event, followed by `CouponStale` when the active
    /// coupon just stopped applying.
    fn refresh_view(&self, state: &mut EngineState) -> Vec<EngineEvent> {
        let totals = compute_totals(
            state.cache.visible(),
            state.coupon.as_ref(),
            &self.inner.config.pricing,
            Utc::now(),
        );

        let mut stale = None;
        let applicable = totals
            .coupon
            .as_ref()
            .is_some_and(CouponEvaluation::is_applicable);
        if state.coupon_applicable
            && let Some(CouponEvaluation {
                code,
                issue: Some(issue),
                ..
            }) = &totals.coupon
        {
            debug!(%code, %issue, "Coupon became inapplicable");
            stale = Some(Notification::CouponStale {
                code: code.clone(),
                issue: issue.clone(),
            });
        }
        state.coupon_applicable = applicable;

        let snapshot = Arc::new(CartSnapshot {
            kind: state.cache.kind(),
            entries: state.cache.visible().cloned().collect(),
            totals,
            coupon_code: state.coupon.as_ref().map(|rule| rule.code.clone()),
            pending: state.cache.entries().filter(|e| e.is_pending()).count(),
        });
        state.snapshot = Arc::clone(&snapshot);

        let mut events = vec![EngineEvent::Changed(snapshot)];
        events.extend(stale.map(EngineEvent::Notice));
        events
    }

    fn publish_busy(&self, state: &EngineState) {
        self.inner.busy.send_replace(state.busy());
    }
}

const fn change_for(applied: &Applied) -> RemoteChange {
    match applied {
        Applied::Upserted(entry) => RemoteChange::Set(entry.quantity),
        Applied::Removed => RemoteChange::Remove,
    }
}

/// Bound a remote call by `timeout`, folding the adapter error into `SyncError`.
async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = std::result::Result<T, RemoteError>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::NetworkFailure(RemoteError::Timeout)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use cartsync_core::DiscountRule;
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::*;
    use crate::remote::{CallBehavior, InMemoryStore};

    fn signed_in() -> Credentials {
        Credentials::with_token(SecretString::from("tok_test".to_string()))
    }

    fn engine(store: InMemoryStore) -> SyncEngine<InMemoryStore> {
        SyncEngine::new(
            store,
            signed_in(),
            EngineConfig::default(),
            CollectionKind::Cart,
        )
    }

    fn tee() -> ProductListing {
        ProductListing::new("tee", Decimal::new(600, 0), 10)
    }

    fn notices(engine: &SyncEngine<InMemoryStore>) -> (Arc<StdMutex<Vec<Notification>>>, Subscription) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = engine.subscribe(move |event| {
            if let EngineEvent::Notice(notice) = event {
                sink.lock().unwrap().push(notice.clone());
            }
        });
        (seen, subscription)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_returns_before_network() {
        let store = InMemoryStore::new().with_listing(tee());
        store.push_behavior(CallBehavior::delayed(Duration::from_secs(2)));
        let engine = engine(store.clone());

        engine.add_item(&tee(), 2).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.totals.subtotal, Decimal::new(1200, 0));
        assert_eq!(snapshot.pending, 1);
        assert!(store.mutation_calls().is_empty());

        engine.settled().await;
        assert_eq!(engine.snapshot().pending, 0);
        assert_eq!(store.line_quantity(&ItemKey::from("tee")), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coupon_stale_fires_once_per_transition() {
        let rule = DiscountRule::fixed("FLAT500", Decimal::new(500, 0))
            .with_min_order(Decimal::new(1000, 0));
        let store = InMemoryStore::new().with_listing(tee()).with_coupon(rule);
        let engine = engine(store);
        let (seen, _subscription) = notices(&engine);

        engine.add_item(&tee(), 2).unwrap();
        engine.apply_coupon("flat500").unwrap();
        engine.settled().await;
        assert_eq!(engine.snapshot().totals.discount, Decimal::new(500, 0));

        let key = ItemKey::from("tee");
        engine.mutate(&key, 1).unwrap();
        engine.settled().await;
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.totals.discount, Decimal::ZERO);
        assert_eq!(snapshot.coupon_code.as_deref(), Some("FLAT500"));

        let stale = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, Notification::CouponStale { .. }))
            .count();
        assert_eq!(stale, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_coupon_is_rejected() {
        let engine = engine(InMemoryStore::new());
        let (seen, _subscription) = notices(&engine);

        engine.apply_coupon("NOPE").unwrap();
        engine.settled().await;

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Notification::CouponRejected {
                code: "NOPE".to_string(),
                error: SyncError::CouponNotFound("NOPE".to_string()),
            }]
        );
        assert!(engine.snapshot().coupon_code.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_coupon_lookups_are_cached() {
        let store = InMemoryStore::new().with_coupon(DiscountRule::percentage("TEN", Decimal::TEN));
        let engine = engine(store.clone());

        engine.apply_coupon("TEN").unwrap();
        engine.settled().await;
        engine.clear_coupon().unwrap();
        engine.apply_coupon("ten").unwrap();
        engine.settled().await;

        let lookups = store
            .calls()
            .into_iter()
            .filter(|call| matches!(call, crate::remote::RemoteCall::FetchCoupon { .. }))
            .count();
        assert_eq!(lookups, 1);
        assert_eq!(engine.snapshot().coupon_code.as_deref(), Some("TEN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_rejects_later_calls() {
        let store = InMemoryStore::new().with_listing(tee());
        let engine = engine(store.clone());
        engine.add_item(&tee(), 1).unwrap();

        engine.dispose();
        engine.settled().await;

        assert!(engine.is_disposed());
        assert_eq!(engine.add_item(&tee(), 1), Err(SyncError::Disposed));
        assert_eq!(engine.refresh(), Err(SyncError::Disposed));
        assert!(store.mutation_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_cancels_pending_work() {
        let store = InMemoryStore::new().with_listing(tee());
        let engine = engine(store.clone());
        engine.add_item(&tee(), 3).unwrap();

        engine.clear_all().unwrap();
        engine.settled().await;

        assert!(engine.snapshot().entries.is_empty());
        assert!(store.mutation_calls().is_empty());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = CartSnapshot::empty(CollectionKind::Wishlist);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "wishlist");
        assert_eq!(json["couponCode"], serde_json::Value::Null);
        assert!(json["totals"]["itemCount"].is_number());
    }
}
