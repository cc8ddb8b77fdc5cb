//! In-process remote store.
//!
//! Holds an authoritative catalog, line table, and coupon table behind a
//! mutex, and replays a script of per-call behaviours (latency, failure,
//! hang) so callers can reproduce slow or failing networks deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cartsync_core::{
    DiscountRule, ItemKey, MutationOutcome, ProductListing, RemoteChange, RemoteRecord,
};
use tracing::debug;

use super::{RemoteError, RemoteStore};

/// How the next remote call behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallBehavior {
    /// Succeed after `delay`.
    Succeed { delay: Duration },
    /// Fail with `error` after `delay`.
    Fail { delay: Duration, error: RemoteError },
    /// Never resolve.
    Hang,
}

impl CallBehavior {
    #[must_use]
    pub const fn delayed(delay: Duration) -> Self {
        Self::Succeed { delay }
    }

    #[must_use]
    pub const fn failing(error: RemoteError) -> Self {
        Self::Fail {
            delay: Duration::ZERO,
            error,
        }
    }
}

impl Default for CallBehavior {
    fn default() -> Self {
        Self::Succeed {
            delay: Duration::ZERO,
        }
    }
}

/// A call observed by the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FetchCollection,
    Mutation { key: ItemKey, change: RemoteChange },
    FetchCoupon { code: String },
}

#[derive(Default)]
struct MemoryInner {
    catalog: BTreeMap<ItemKey, ProductListing>,
    lines: BTreeMap<ItemKey, u32>,
    coupons: HashMap<String, DiscountRule>,
    script: VecDeque<CallBehavior>,
    calls: Vec<RemoteCall>,
}

impl MemoryInner {
    fn record(&self, key: &ItemKey, quantity: u32) -> Option<RemoteRecord> {
        self.catalog.get(key).map(|listing| RemoteRecord {
            key: key.clone(),
            quantity,
            unit_price: listing.unit_price,
            original_unit_price: listing.original_unit_price,
            stock_limit: listing.stock_limit,
        })
    }
}

/// Authoritative in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a catalog listing.
    #[must_use]
    pub fn with_listing(self, listing: ProductListing) -> Self {
        self.upsert_listing(listing);
        self
    }

    pub fn upsert_listing(&self, listing: ProductListing) {
        self.lock().catalog.insert(listing.key.clone(), listing);
    }

    /// Change the stock limit of a listed product.
    pub fn set_stock(&self, key: &ItemKey, stock_limit: u32) {
        if let Some(listing) = self.lock().catalog.get_mut(key) {
            listing.stock_limit = stock_limit;
        }
    }

    /// Write a line directly, bypassing stock checks (simulates another
    /// session or a back-office edit).
    pub fn put_line(&self, key: &ItemKey, quantity: u32) {
        let mut inner = self.lock();
        if quantity == 0 {
            inner.lines.remove(key);
        } else {
            inner.lines.insert(key.clone(), quantity);
        }
    }

    #[must_use]
    pub fn with_coupon(self, rule: DiscountRule) -> Self {
        self.lock().coupons.insert(rule.code.to_uppercase(), rule);
        self
    }

    /// Queue the behaviour of a future call. Calls without a queued
    /// behaviour succeed immediately.
    pub fn push_behavior(&self, behavior: CallBehavior) {
        self.lock().script.push_back(behavior);
    }

    /// Quantity the store currently holds for `key`.
    #[must_use]
    pub fn line_quantity(&self, key: &ItemKey) -> Option<u32> {
        self.lock().lines.get(key).copied()
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Mutation calls only, as `(key, change)` pairs.
    #[must_use]
    pub fn mutation_calls(&self) -> Vec<(ItemKey, RemoteChange)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Mutation { key, change } => Some((key.clone(), *change)),
                _ => None,
            })
            .collect()
    }

    /// Log the call and play back the next scripted behaviour.
    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let behavior = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.script.pop_front().unwrap_or_default()
        };

        match behavior {
            CallBehavior::Succeed { delay } => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            CallBehavior::Fail { delay, error } => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            CallBehavior::Hang => std::future::pending().await,
        }
    }
}

impl RemoteStore for InMemoryStore {
    async fn fetch_collection(&self) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.begin(RemoteCall::FetchCollection).await?;
        let inner = self.lock();
        Ok(inner
            .lines
            .iter()
            .filter_map(|(key, quantity)| inner.record(key, *quantity))
            .collect())
    }

    async fn apply_mutation(
        &self,
        key: &ItemKey,
        change: RemoteChange,
    ) -> Result<MutationOutcome, RemoteError> {
        self.begin(RemoteCall::Mutation {
            key: key.clone(),
            change,
        })
        .await?;

        let mut inner = self.lock();
        match change {
            RemoteChange::Remove | RemoteChange::Set(0) => {
                inner.lines.remove(key);
                debug!(%key, "memory store removed line");
                Ok(MutationOutcome::Removed)
            }
            RemoteChange::Set(quantity) => {
                let listing = inner
                    .catalog
                    .get(key)
                    .ok_or_else(|| RemoteError::NotFound(format!("product {key}")))?;
                if quantity > listing.stock_limit {
                    return Err(RemoteError::Rejected {
                        status: 409,
                        message: format!("only {} in stock", listing.stock_limit),
                    });
                }
                inner.lines.insert(key.clone(), quantity);
                debug!(%key, quantity, "memory store set line");
                inner
                    .record(key, quantity)
                    .map(MutationOutcome::Updated)
                    .ok_or_else(|| RemoteError::NotFound(format!("product {key}")))
            }
        }
    }

    async fn fetch_coupon(&self, code: &str) -> Result<Option<DiscountRule>, RemoteError> {
        self.begin(RemoteCall::FetchCoupon {
            code: code.to_string(),
        })
        .await?;
        Ok(self.lock().coupons.get(&code.to_uppercase()).cloned())
    }
}
