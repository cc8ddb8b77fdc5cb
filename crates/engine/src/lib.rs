//! Cartsync Engine - optimistic cart and wishlist synchronization.
//!
//! Keeps a local mirror of a remote collection that reflects the user's
//! latest intent immediately, while remote calls run in the background.
//!
//! # Architecture
//!
//! - [`cache`] - the local mirror with rollback baselines and versions
//! - [`scheduler`] - per-key debounce and intent ordering
//! - [`reconcile`] - folds remote results back into the cache
//! - [`pricing`] - pure totals and coupon evaluation
//! - [`remote`] - the `RemoteStore` trait and its adapters
//! - [`engine`] - the [`SyncEngine`] facade tying them together
//!
//! # Example
//!
//! ```no_run
//! use cartsync_core::{CollectionKind, ProductListing};
//! use cartsync_engine::{Credentials, EngineConfig, InMemoryStore, SyncEngine};
//! use rust_decimal::Decimal;
//! use secrecy::SecretString;
//!
//! # async fn run() -> Result<(), cartsync_engine::SyncError> {
//! let tee = ProductListing::new("tee", Decimal::new(600, 0), 10);
//! let store = InMemoryStore::new().with_listing(tee.clone());
//! let credentials = Credentials::with_token(SecretString::from("token".to_string()));
//! let engine = SyncEngine::new(store, credentials, EngineConfig::default(), CollectionKind::Cart);
//!
//! engine.init().await?;
//! engine.add_item(&tee, 2)?;
//! assert_eq!(engine.snapshot().totals.subtotal, Decimal::new(1200, 0));
//! engine.settled().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod pricing;
pub mod reconcile;
pub mod remote;
pub mod scheduler;

pub use auth::Credentials;
pub use cache::{CacheEntry, LocalCache, PendingOp};
pub use config::{ConfigError, EngineConfig, PricingConfig, RemoteConfig};
pub use engine::{CartSnapshot, SyncEngine};
pub use error::{CouponIssue, Result, SyncError};
pub use notify::{EngineEvent, Listener, Notification, Subscription};
pub use pricing::{CouponEvaluation, Totals, compute_totals};
pub use remote::{
    CallBehavior, HttpRemoteStore, InMemoryStore, RemoteCall, RemoteError, RemoteStore,
};
