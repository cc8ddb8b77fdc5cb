//! Integration tests for cartsync.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `sync_*` - engine scenarios against [`InMemoryStore`] on a paused clock
//! - `http_remote` - [`HttpRemoteStore`](cartsync_engine::HttpRemoteStore)
//!   against [`fake_remote::FakeRemote`], a local axum server
//!
//! Helpers shared by the test binaries live here.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod fake_remote;

use std::sync::{Arc, Mutex, PoisonError};

use cartsync_core::{CollectionKind, ItemKey, ProductListing};
use cartsync_engine::{
    Credentials, EngineConfig, EngineEvent, InMemoryStore, Notification, Subscription,
    SyncEngine,
};
use rust_decimal::Decimal;
use secrecy::SecretString;

/// Token accepted by the fake remote.
pub const TEST_TOKEN: &str = "tok_integration_7d21";

/// Listing whose list price equals its selling price.
#[must_use]
pub fn listing(key: &str, price: i64, stock: u32) -> ProductListing {
    ProductListing::new(key, Decimal::new(price, 0), stock)
}

#[must_use]
pub fn key(key: &str) -> ItemKey {
    ItemKey::from(key)
}

#[must_use]
pub fn signed_in() -> Credentials {
    Credentials::with_token(SecretString::from(TEST_TOKEN.to_string()))
}

/// Cart engine over `store` with default timings and a signed-in session.
#[must_use]
pub fn cart_engine(store: &InMemoryStore) -> SyncEngine<InMemoryStore> {
    engine_with(store, CollectionKind::Cart, EngineConfig::default())
}

#[must_use]
pub fn engine_with(
    store: &InMemoryStore,
    kind: CollectionKind,
    config: EngineConfig,
) -> SyncEngine<InMemoryStore> {
    SyncEngine::new(store.clone(), signed_in(), config, kind)
}

/// Records every notice an engine emits.
pub struct NoticeLog {
    seen: Arc<Mutex<Vec<Notification>>>,
    _subscription: Subscription,
}

impl NoticeLog {
    pub fn attach<S: cartsync_engine::RemoteStore>(engine: &SyncEngine<S>) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = engine.subscribe(move |event| {
            if let EngineEvent::Notice(notice) = event {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(notice.clone());
            }
        });
        Self {
            seen,
            _subscription: subscription,
        }
    }

    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(Notification::is_failure)
            .collect()
    }
}
