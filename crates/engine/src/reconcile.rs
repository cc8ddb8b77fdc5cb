//! Folding remote results back into the local cache.
//!
//! A result is *fresh* when no newer intent has been issued for its key since
//! the call was dispatched. Fresh results are authoritative. Stale results
//! only contribute catalog fields (price, stock) so a slow first response
//! cannot clobber the quantity of a faster second mutation.

use cartsync_core::{ItemKey, MutationOutcome};
use tracing::{debug, warn};

use crate::cache::LocalCache;
use crate::error::SyncError;
use crate::notify::Notification;

/// Apply the outcome of one dispatched mutation.
///
/// Returns the notice to surface, if the outcome is one a caller should hear
/// about. Stale successes are silent: the newer intent reports for itself.
pub fn reconcile(
    cache: &mut LocalCache,
    key: &ItemKey,
    fresh: bool,
    result: Result<MutationOutcome, SyncError>,
) -> Option<Notification> {
    match result {
        Ok(MutationOutcome::Updated(mut record)) => {
            record.key = key.clone();
            let Some(version) = cache.adopt_record(&record, fresh) else {
                debug!(%key, "Dropping result for entry no longer cached");
                return None;
            };
            if fresh {
                Some(Notification::Synced {
                    key: key.clone(),
                    version,
                })
            } else {
                debug!(%key, server_quantity = record.quantity, "Stale response, kept local quantity");
                None
            }
        }
        Ok(MutationOutcome::Removed) => {
            if cache.adopt_removal(key, fresh) && fresh {
                Some(Notification::Removed { key: key.clone() })
            } else {
                debug!(%key, fresh, "Removal adopted without notice");
                None
            }
        }
        Err(error) => {
            cache.get(key)?;
            if fresh {
                let rolled_back = cache.baseline(key).is_some();
                let restored = cache.rollback(key);
                warn!(
                    %key,
                    error = %error,
                    restored_quantity = restored.as_ref().map(|entry| entry.quantity),
                    "Mutation failed, rolled back"
                );
                Some(Notification::SyncFailed {
                    key: key.clone(),
                    error,
                    rolled_back,
                })
            } else {
                warn!(%key, error = %error, "Superseded mutation failed, newer intent pending");
                Some(Notification::SyncFailed {
                    key: key.clone(),
                    error,
                    rolled_back: false,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartsync_core::{CollectionKind, RemoteRecord};
    use rust_decimal::Decimal;

    use super::*;
    use crate::cache::PendingOp;
    use crate::remote::RemoteError;

    fn record(quantity: u32, price: i64, stock: u32) -> RemoteRecord {
        RemoteRecord {
            key: ItemKey::from("p1"),
            quantity,
            unit_price: Decimal::new(price, 0),
            original_unit_price: Decimal::new(price, 0),
            stock_limit: stock,
        }
    }

    fn cache_at(quantity: u32) -> LocalCache {
        let mut cache = LocalCache::new(CollectionKind::Cart);
        cache.replace_all(vec![record(quantity, 100, 10)]);
        cache
    }

    fn key() -> ItemKey {
        ItemKey::from("p1")
    }

    #[test]
    fn test_failure_rolls_back_to_confirmed_quantity() {
        let mut cache = cache_at(2);
        cache.upsert(&key(), 5).unwrap();

        let notice = reconcile(
            &mut cache,
            &key(),
            true,
            Err(SyncError::NetworkFailure(RemoteError::Timeout)),
        );

        let entry = cache.get(&key()).unwrap();
        assert_eq!(entry.quantity, 2);
        assert_eq!(entry.pending_op, PendingOp::None);
        assert_eq!(
            notice,
            Some(Notification::SyncFailed {
                key: key(),
                error: SyncError::NetworkFailure(RemoteError::Timeout),
                rolled_back: true,
            })
        );
    }

    #[test]
    fn test_fresh_success_overwrites_and_bumps_version() {
        let mut cache = cache_at(2);
        cache.upsert(&key(), 4).unwrap();

        let notice = reconcile(
            &mut cache,
            &key(),
            true,
            Ok(MutationOutcome::Updated(record(4, 95, 9))),
        );

        let entry = cache.get(&key()).unwrap();
        assert_eq!(entry.quantity, 4);
        assert_eq!(entry.unit_price, Decimal::new(95, 0));
        assert_eq!(entry.version, 2);
        assert!(!entry.is_pending());
        assert_eq!(notice, Some(Notification::Synced { key: key(), version: 2 }));
    }

    #[test]
    fn test_stale_success_keeps_newer_quantity() {
        let mut cache = cache_at(2);
        cache.upsert(&key(), 3).unwrap();
        cache.upsert(&key(), 5).unwrap();

        let notice = reconcile(
            &mut cache,
            &key(),
            false,
            Ok(MutationOutcome::Updated(record(3, 100, 6))),
        );

        let entry = cache.get(&key()).unwrap();
        assert_eq!(entry.quantity, 5);
        assert_eq!(entry.stock_limit, 6);
        assert_eq!(entry.pending_op, PendingOp::Upsert(5));
        assert!(notice.is_none());
    }

    #[test]
    fn test_stale_failure_does_not_roll_back() {
        let mut cache = cache_at(2);
        cache.upsert(&key(), 5).unwrap();

        let notice = reconcile(
            &mut cache,
            &key(),
            false,
            Err(SyncError::NetworkFailure(RemoteError::Timeout)),
        );
        assert_eq!(cache.get(&key()).unwrap().quantity, 5);
        assert!(matches!(
            notice,
            Some(Notification::SyncFailed { rolled_back: false, .. })
        ));
    }

    #[test]
    fn test_confirmed_removal_deletes_entry() {
        let mut cache = cache_at(2);
        cache.remove(&key()).unwrap();

        let notice = reconcile(&mut cache, &key(), true, Ok(MutationOutcome::Removed));
        assert!(cache.get(&key()).is_none());
        assert_eq!(notice, Some(Notification::Removed { key: key() }));
    }

    #[test]
    fn test_failed_removal_restores_entry() {
        let mut cache = cache_at(2);
        cache.remove(&key()).unwrap();

        reconcile(
            &mut cache,
            &key(),
            true,
            Err(SyncError::NetworkFailure(RemoteError::Network("reset".into()))),
        );
        let entry = cache.get(&key()).unwrap();
        assert!(!entry.is_removed());
        assert_eq!(entry.quantity, 2);
        assert_eq!(cache.visible().count(), 1);
    }

    #[test]
    fn test_result_for_cleared_entry_is_dropped() {
        let mut cache = LocalCache::new(CollectionKind::Cart);
        let notice = reconcile(
            &mut cache,
            &key(),
            true,
            Ok(MutationOutcome::Updated(record(1, 100, 10))),
        );
        assert!(notice.is_none());
        assert!(cache.is_empty());
    }
}
