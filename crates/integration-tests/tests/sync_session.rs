//! Authentication, refresh, lifecycle, and wishlist scenarios.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartsync_core::{CollectionKind, RemoteChange};
use cartsync_engine::{
    CallBehavior, CartSnapshot, Credentials, EngineConfig, EngineEvent, InMemoryStore,
    Notification, RemoteError, SyncEngine, SyncError,
};
use cartsync_integration_tests::{NoticeLog, cart_engine, engine_with, key, listing, signed_in};

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unauthenticated_mutation_never_touches_cache() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    let engine = SyncEngine::new(
        store.clone(),
        Credentials::anonymous(),
        EngineConfig::default(),
        CollectionKind::Cart,
    );
    let notices = NoticeLog::attach(&engine);
    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    let _changes = engine.subscribe(move |event| {
        if matches!(event, EngineEvent::Changed(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert_eq!(engine.add_item(&p1, 1), Err(SyncError::NotAuthenticated));
    engine.settled().await;

    assert!(engine.snapshot().entries.is_empty());
    assert_eq!(changes.load(Ordering::SeqCst), 0);
    assert!(store.mutation_calls().is_empty());
    assert_eq!(
        notices.all(),
        vec![Notification::Rejected {
            key: Some(key("p1")),
            error: SyncError::NotAuthenticated,
        }]
    );

    engine.credentials().sign_in(secrecy::SecretString::from("tok".to_string()));
    engine.add_item(&p1, 1).unwrap();
    engine.settled().await;
    assert_eq!(store.line_quantity(&p1.key), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_blocks_further_mutations() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    store.put_line(&p1.key, 2);
    let engine = cart_engine(&store);
    engine.init().await.unwrap();

    engine.credentials().sign_out();
    assert_eq!(engine.mutate(&p1.key, 3), Err(SyncError::NotAuthenticated));
    assert_eq!(engine.remove_item(&p1.key), Err(SyncError::NotAuthenticated));
    assert_eq!(engine.snapshot().entry(&p1.key).unwrap().quantity, 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_on_server_rolls_back() {
    let store = InMemoryStore::new().with_listing(listing("p1", 100, 10));
    store.put_line(&key("p1"), 2);
    let engine = cart_engine(&store);
    engine.init().await.unwrap();
    let notices = NoticeLog::attach(&engine);

    store.push_behavior(CallBehavior::failing(RemoteError::Unauthorized));
    engine.mutate(&key("p1"), 3).unwrap();
    engine.settled().await;

    assert_eq!(engine.snapshot().entry(&key("p1")).unwrap().quantity, 2);
    assert!(matches!(
        notices.failures().as_slice(),
        [Notification::SyncFailed {
            error: SyncError::NotAuthenticated,
            rolled_back: true,
            ..
        }]
    ));
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_preserves_entries_with_calls_in_flight() {
    let store = InMemoryStore::new()
        .with_listing(listing("p1", 100, 10))
        .with_listing(listing("p2", 50, 10));
    store.put_line(&key("p1"), 2);
    store.put_line(&key("p2"), 1);
    let engine = cart_engine(&store);
    engine.init().await.unwrap();

    store.push_behavior(CallBehavior::delayed(Duration::from_secs(1)));
    engine.mutate(&key("p1"), 4).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Another session changes p2 while p1 is on the wire
    store.put_line(&key("p2"), 3);
    engine.refresh().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entry(&key("p1")).unwrap().quantity, 4);
    assert_eq!(snapshot.entry(&key("p2")).unwrap().quantity, 3);

    engine.settled().await;
    assert_eq!(engine.snapshot().entry(&key("p1")).unwrap().quantity, 4);
    assert_eq!(store.line_quantity(&key("p1")), Some(4));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_settles_intent_the_server_already_has() {
    let store = InMemoryStore::new().with_listing(listing("p1", 100, 10));
    store.put_line(&key("p1"), 2);
    let engine = cart_engine(&store);
    engine.init().await.unwrap();

    engine.mutate(&key("p1"), 4).unwrap();
    store.put_line(&key("p1"), 4);
    engine.refresh().unwrap();
    engine.settled().await;

    let entry = engine.snapshot().entry(&key("p1")).cloned().unwrap();
    assert_eq!(entry.quantity, 4);
    assert!(!entry.is_pending());
    assert!(store.mutation_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_drops_clean_entries_missing_remotely() {
    let store = InMemoryStore::new()
        .with_listing(listing("p1", 100, 10))
        .with_listing(listing("p2", 50, 10));
    store.put_line(&key("p1"), 1);
    store.put_line(&key("p2"), 1);
    let engine = cart_engine(&store);
    engine.init().await.unwrap();
    let notices = NoticeLog::attach(&engine);

    store.put_line(&key("p2"), 0);
    engine.refresh().unwrap();
    engine.settled().await;

    assert!(engine.snapshot().entry(&key("p2")).is_none());
    assert_eq!(notices.all(), vec![Notification::Refreshed { entries: 1 }]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_cache() {
    let store = InMemoryStore::new().with_listing(listing("p1", 100, 10));
    store.put_line(&key("p1"), 1);
    let engine = cart_engine(&store);
    engine.init().await.unwrap();
    let notices = NoticeLog::attach(&engine);

    store.push_behavior(CallBehavior::failing(RemoteError::Network("dns".to_string())));
    engine.refresh().unwrap();
    engine.settled().await;

    assert_eq!(engine.snapshot().entries.len(), 1);
    assert_eq!(
        notices.all(),
        vec![Notification::RefreshFailed {
            error: SyncError::NetworkFailure(RemoteError::Network("dns".to_string())),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_init_reports_fetch_failure() {
    let store = InMemoryStore::new();
    store.push_behavior(CallBehavior::failing(RemoteError::Unauthorized));
    let engine = cart_engine(&store);
    assert_eq!(engine.init().await, Err(SyncError::NotAuthenticated));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_listener_hears_nothing() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    let engine = cart_engine(&store);
    let heard = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&heard);
    let subscription = engine.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    engine.add_item(&p1, 1).unwrap();
    let after_add = heard.load(Ordering::SeqCst);
    assert!(after_add >= 1);

    subscription.unsubscribe();
    engine.settled().await;
    assert_eq!(heard.load(Ordering::SeqCst), after_add);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_drops_in_flight_results() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    let engine = cart_engine(&store);

    store.push_behavior(CallBehavior::delayed(Duration::from_secs(1)));
    engine.add_item(&p1, 1).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.dispose();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(engine.snapshot().entry(&p1.key).unwrap().quantity, 1);
    assert!(engine.snapshot().entry(&p1.key).unwrap().is_pending());
    assert_eq!(engine.mutate(&p1.key, 2), Err(SyncError::Disposed));
}

#[tokio::test(start_paused = true)]
async fn test_re_add_after_clear_all_waits_for_call_in_flight() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    let engine = cart_engine(&store);

    store.push_behavior(CallBehavior::delayed(Duration::from_secs(1)));
    engine.add_item(&p1, 3).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    engine.clear_all().unwrap();
    engine.add_item(&p1, 1).unwrap();
    engine.settled().await;

    assert_eq!(
        store.mutation_calls(),
        vec![
            (key("p1"), RemoteChange::Set(3)),
            (key("p1"), RemoteChange::Set(1)),
        ]
    );
    let entry = engine.snapshot().entry(&p1.key).cloned().unwrap();
    assert_eq!(entry.quantity, 1);
    assert!(!entry.is_pending());
    assert_eq!(store.line_quantity(&p1.key), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_with_call_in_flight_stays_cleared() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    let engine = cart_engine(&store);

    store.push_behavior(CallBehavior::delayed(Duration::from_secs(1)));
    engine.add_item(&p1, 3).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.clear_all().unwrap();
    engine.settled().await;

    assert!(engine.snapshot().entries.is_empty());
    assert_eq!(store.mutation_calls(), vec![(key("p1"), RemoteChange::Set(3))]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listener_ends_on_latest_snapshot_across_threads() {
    let listings: Vec<_> = (0..8).map(|i| listing(&format!("p{i}"), 10, 100)).collect();
    let store = listings
        .iter()
        .fold(InMemoryStore::new(), |store, l| store.with_listing(l.clone()));
    let config = EngineConfig {
        debounce: Duration::from_millis(2),
        ..EngineConfig::default()
    };
    let engine = engine_with(&store, CollectionKind::Cart, config);

    let last_seen: Arc<Mutex<Option<Arc<CartSnapshot>>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&last_seen);
    let _subscription = engine.subscribe(move |event| {
        if let EngineEvent::Changed(snapshot) = event {
            *sink.lock().unwrap() = Some(Arc::clone(snapshot));
        }
    });

    let mut workers = Vec::new();
    for listing in listings {
        let engine = engine.clone();
        workers.push(tokio::spawn(async move {
            engine.add_item(&listing, 1).unwrap();
            for quantity in 2..=20 {
                engine.mutate(&listing.key, quantity).unwrap();
                tokio::task::yield_now().await;
                if quantity % 5 == 0 {
                    tokio::time::sleep(Duration::from_millis(3)).await;
                }
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }
    engine.settled().await;

    let seen = last_seen.lock().unwrap().clone().unwrap();
    assert_eq!(*seen, *engine.snapshot());
    assert!(seen.entries.iter().all(|entry| entry.quantity == 20));
    assert_eq!(seen.pending, 0);
}

// =============================================================================
// Wishlist
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_wishlist_entries_hold_one_unit() {
    let p1 = listing("p1", 100, 10);
    let store = InMemoryStore::new().with_listing(p1.clone());
    let engine = engine_with(&store, CollectionKind::Wishlist, EngineConfig::default());

    engine.add_item(&p1, 1).unwrap();
    assert!(matches!(
        engine.mutate(&p1.key, 2),
        Err(SyncError::StockExceeded { limit: 1, .. })
    ));
    assert!(matches!(
        engine.add_item(&p1, 1),
        Err(SyncError::StockExceeded { requested: 2, .. })
    ));

    engine.settled().await;
    assert_eq!(store.mutation_calls(), vec![(key("p1"), RemoteChange::Set(1))]);
    assert_eq!(engine.snapshot().kind, CollectionKind::Wishlist);
}

#[tokio::test(start_paused = true)]
async fn test_cart_and_wishlist_engines_are_independent() {
    let p1 = listing("p1", 100, 10);
    let cart_store = InMemoryStore::new().with_listing(p1.clone());
    let wishlist_store = InMemoryStore::new().with_listing(p1.clone());
    let credentials = signed_in();
    let cart = SyncEngine::new(
        cart_store.clone(),
        credentials.clone(),
        EngineConfig::default(),
        CollectionKind::Cart,
    );
    let wishlist = SyncEngine::new(
        wishlist_store.clone(),
        credentials,
        EngineConfig::default(),
        CollectionKind::Wishlist,
    );

    cart.add_item(&p1, 3).unwrap();
    wishlist.add_item(&p1, 1).unwrap();
    cart.settled().await;
    wishlist.settled().await;

    assert_eq!(cart_store.line_quantity(&p1.key), Some(3));
    assert_eq!(wishlist_store.line_quantity(&p1.key), Some(1));
}
