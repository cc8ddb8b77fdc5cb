//! Local mirror of a remote collection.
//!
//! Every read and write of an entry goes through [`LocalCache`] so rollback
//! baselines and version counters stay consistent. The cache itself never
//! talks to the network; the scheduler decides when to dispatch and the
//! reconciler feeds results back through the `adopt_*`/`rollback` methods.
//!
//! # Entry lifecycle
//!
//! ```text
//! Clean --mutation--> PendingSync --success--> Clean
//!                     PendingSync --failure--> Clean (rolled back)
//! Clean --remove confirmed--> Deleted
//! ```

use std::collections::{BTreeMap, HashMap};

use cartsync_core::{CollectionKind, ItemKey, ProductListing, RemoteRecord};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{Result, SyncError};

/// The mutation an entry is waiting on the server to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case", tag = "op", content = "quantity")]
pub enum PendingOp {
    #[default]
    None,
    Upsert(u32),
    Remove,
}

/// One mirrored line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: ItemKey,
    /// Locally visible quantity (the latest issued intent).
    pub quantity: u32,
    pub unit_price: Decimal,
    pub original_unit_price: Decimal,
    /// Server-supplied maximum. Zero means out of stock.
    pub stock_limit: u32,
    pub pending_op: PendingOp,
    /// Bumped on every successful reconciliation.
    pub version: u64,
}

impl CacheEntry {
    fn from_listing(listing: &ProductListing, quantity: u32) -> Self {
        Self {
            key: listing.key.clone(),
            quantity,
            unit_price: listing.unit_price,
            original_unit_price: listing.original_unit_price,
            stock_limit: listing.stock_limit,
            pending_op: PendingOp::None,
            version: 0,
        }
    }

    fn from_record(record: &RemoteRecord, version: u64) -> Self {
        Self {
            key: record.key.clone(),
            quantity: record.quantity,
            unit_price: record.unit_price,
            original_unit_price: record.original_unit_price,
            stock_limit: record.stock_limit,
            pending_op: PendingOp::None,
            version,
        }
    }

    fn adopt_catalog_fields(&mut self, record: &RemoteRecord) {
        self.unit_price = record.unit_price;
        self.original_unit_price = record.original_unit_price;
        self.stock_limit = record.stock_limit;
    }

    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock_limit > 0
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending_op != PendingOp::None
    }

    /// Hidden from callers because a removal is in flight.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.pending_op == PendingOp::Remove
    }

    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Savings against the list price for this line.
    #[must_use]
    pub fn line_savings(&self) -> Decimal {
        ((self.original_unit_price - self.unit_price) * Decimal::from(self.quantity))
            .max(Decimal::ZERO)
    }
}

/// Immutable copy of an entry taken before an optimistic change.
///
/// `entry == None` records that the key was absent, so rolling back deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub key: ItemKey,
    pub entry: Option<CacheEntry>,
}

/// Result of an optimistic quantity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The entry now shows this state.
    Upserted(CacheEntry),
    /// A zero quantity turned the change into a removal.
    Removed,
}

/// What a full refresh did to entries that had a mutation outstanding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    /// Pending entries the server already agreed with; their intents can be dropped.
    pub settled: Vec<ItemKey>,
    /// Pending entries left untouched until their own round trip resolves.
    pub preserved: Vec<ItemKey>,
}

/// In-memory keyed mirror of one remote collection.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    kind: CollectionKind,
    entries: BTreeMap<ItemKey, CacheEntry>,
    /// Last confirmed state per pending key, for rollback.
    baselines: HashMap<ItemKey, EntrySnapshot>,
}

impl LocalCache {
    #[must_use]
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            baselines: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// The entry for `key`, including one whose removal is pending.
    #[must_use]
    pub fn get(&self, key: &ItemKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Entries callers should see: everything not pending removal.
    pub fn visible(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().filter(|entry| !entry.is_removed())
    }

    /// All entries, pending removals included.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rollback target for a pending key.
    #[must_use]
    pub fn baseline(&self, key: &ItemKey) -> Option<&EntrySnapshot> {
        self.baselines.get(key)
    }

    fn snapshot_of(&self, key: &ItemKey) -> EntrySnapshot {
        EntrySnapshot {
            key: key.clone(),
            entry: self.entries.get(key).cloned(),
        }
    }

    /// Remember the confirmed state once, at the first unconfirmed change.
    fn capture_baseline(&mut self, snapshot: &EntrySnapshot) {
        if !self.baselines.contains_key(&snapshot.key) {
            self.baselines.insert(snapshot.key.clone(), snapshot.clone());
        }
    }

    fn limit_for(&self, entry: &CacheEntry) -> u32 {
        self.kind
            .max_quantity()
            .map_or(entry.stock_limit, |cap| cap.min(entry.stock_limit))
    }

    /// Set the quantity of a cached entry.
    ///
    /// A zero quantity is a removal. Quantities above the stock limit are
    /// rejected and leave the cache unchanged.
    ///
    /// # Errors
    ///
    /// `UnknownKey` when `key` is not cached, `StockExceeded` when
    /// `quantity` is above the limit.
    pub fn upsert(&mut self, key: &ItemKey, quantity: u32) -> Result<(Applied, EntrySnapshot)> {
        if quantity == 0 {
            return self.remove(key).map(|previous| (Applied::Removed, previous));
        }

        let entry = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_removed())
            .ok_or_else(|| SyncError::UnknownKey(key.clone()))?;
        let limit = self.limit_for(entry);
        if quantity > limit {
            return Err(SyncError::StockExceeded {
                key: key.clone(),
                requested: quantity,
                limit,
            });
        }

        let previous = self.snapshot_of(key);
        self.capture_baseline(&previous);

        let clamped = quantity.clamp(1, limit);
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| SyncError::UnknownKey(key.clone()))?;
        entry.quantity = clamped;
        entry.pending_op = PendingOp::Upsert(clamped);
        Ok((Applied::Upserted(entry.clone()), previous))
    }

    /// Add `quantity` units of a product, creating the entry from `listing`
    /// when it is not cached (or is pending removal).
    ///
    /// # Errors
    ///
    /// `StockExceeded` when the resulting quantity is above the limit.
    pub fn add(
        &mut self,
        listing: &ProductListing,
        quantity: u32,
    ) -> Result<(Applied, EntrySnapshot)> {
        let key = &listing.key;
        let target = match self.entries.get(key) {
            Some(entry) if !entry.is_removed() => entry.quantity.saturating_add(quantity),
            _ => quantity,
        };

        match self.entries.get(key) {
            Some(entry) if !entry.is_removed() => self.upsert(key, target),
            existing => {
                let target = target.max(1);
                let mut fresh = CacheEntry::from_listing(listing, target);
                fresh.version = existing.map_or(0, |entry| entry.version);
                let limit = self.limit_for(&fresh);
                if target > limit {
                    return Err(SyncError::StockExceeded {
                        key: key.clone(),
                        requested: target,
                        limit,
                    });
                }

                let previous = self.snapshot_of(key);
                self.capture_baseline(&previous);
                fresh.pending_op = PendingOp::Upsert(target);
                self.entries.insert(key.clone(), fresh.clone());
                Ok((Applied::Upserted(fresh), previous))
            }
        }
    }

    /// Hide an entry pending server confirmation of its removal.
    ///
    /// The entry stays in the map as a tombstone so a failed removal can be
    /// restored from its baseline.
    ///
    /// # Errors
    ///
    /// `UnknownKey` when `key` is not cached or already pending removal.
    pub fn remove(&mut self, key: &ItemKey) -> Result<EntrySnapshot> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_removed() => {}
            _ => return Err(SyncError::UnknownKey(key.clone())),
        }

        let previous = self.snapshot_of(key);
        self.capture_baseline(&previous);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.pending_op = PendingOp::Remove;
        }
        Ok(previous)
    }

    /// Adopt a server record for `key`.
    ///
    /// With `fresh`, the record is the answer to the latest intent: quantity
    /// and catalog fields are overwritten and the entry becomes clean. Without
    /// it, a newer intent is outstanding: only price and stock are taken, and
    /// the record becomes the new rollback baseline. Returns the new version,
    /// or `None` when the entry is gone (cleared while the call was in flight).
    pub fn adopt_record(&mut self, record: &RemoteRecord, fresh: bool) -> Option<u64> {
        let entry = self.entries.get_mut(&record.key)?;
        entry.version += 1;
        let version = entry.version;
        entry.adopt_catalog_fields(record);

        if fresh {
            entry.quantity = record.quantity;
            entry.pending_op = PendingOp::None;
            self.baselines.remove(&record.key);
        } else if entry.is_pending() {
            self.baselines.insert(
                record.key.clone(),
                EntrySnapshot {
                    key: record.key.clone(),
                    entry: Some(CacheEntry::from_record(record, version)),
                },
            );
        }
        Some(version)
    }

    /// Adopt a server-side removal of `key`.
    ///
    /// With `fresh` the entry is deleted. Otherwise a newer intent (a re-add)
    /// is outstanding, so only the baseline changes to "absent".
    pub fn adopt_removal(&mut self, key: &ItemKey, fresh: bool) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if fresh {
            self.entries.remove(key);
            self.baselines.remove(key);
        } else if self.entries.get(key).is_some_and(CacheEntry::is_pending) {
            self.baselines.insert(
                key.clone(),
                EntrySnapshot {
                    key: key.clone(),
                    entry: None,
                },
            );
        }
        true
    }

    /// Restore `key` to its last confirmed state. Returns the restored entry,
    /// `None` if the key was absent before the failed change.
    pub fn rollback(&mut self, key: &ItemKey) -> Option<CacheEntry> {
        let baseline = self.baselines.remove(key)?;
        match baseline.entry {
            Some(mut entry) => {
                entry.pending_op = PendingOp::None;
                self.entries.insert(key.clone(), entry.clone());
                Some(entry)
            }
            None => {
                self.entries.remove(key);
                None
            }
        }
    }

    /// Replace the cache with a full remote listing.
    ///
    /// Clean entries always take the server's state (or disappear). Pending
    /// entries are kept as-is unless the server already reflects their
    /// intent, in which case they become clean and are reported as settled.
    pub fn replace_all(&mut self, records: Vec<RemoteRecord>) -> ReplaceReport {
        let mut incoming: BTreeMap<ItemKey, RemoteRecord> = records
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        let mut report = ReplaceReport::default();
        let mut next = BTreeMap::new();

        for (key, entry) in std::mem::take(&mut self.entries) {
            let remote = incoming.remove(&key);
            match (entry.pending_op, remote) {
                (PendingOp::None, Some(record)) => {
                    next.insert(key, CacheEntry::from_record(&record, entry.version + 1));
                }
                (PendingOp::None, None) => {}
                (PendingOp::Upsert(target), Some(record)) if record.quantity == target => {
                    self.baselines.remove(&key);
                    next.insert(
                        key.clone(),
                        CacheEntry::from_record(&record, entry.version + 1),
                    );
                    report.settled.push(key);
                }
                (PendingOp::Remove, None) => {
                    self.baselines.remove(&key);
                    report.settled.push(key);
                }
                (_, remote) => {
                    // The server's view becomes the rollback target
                    let baseline = remote.map(|record| CacheEntry::from_record(&record, entry.version));
                    self.baselines.insert(
                        key.clone(),
                        EntrySnapshot {
                            key: key.clone(),
                            entry: baseline,
                        },
                    );
                    report.preserved.push(key.clone());
                    next.insert(key, entry);
                }
            }
        }

        for (key, record) in incoming {
            next.insert(key, CacheEntry::from_record(&record, 1));
        }

        self.entries = next;
        report
    }

    /// Drop every entry and baseline.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.baselines.clear();
    }
}
