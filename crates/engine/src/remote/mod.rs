//! Remote store adapters.
//!
//! # Architecture
//!
//! - The remote store is the source of truth; the engine only mirrors it
//! - Adapters are the only place network calls happen
//! - Adapters never retry; failures go straight back to the reconciler
//!
//! # Adapters
//!
//! - [`HttpRemoteStore`] - JSON over HTTP via `reqwest`
//! - [`InMemoryStore`] - authoritative in-process store for demos and tests

mod http;
mod memory;

use std::future::Future;

use cartsync_core::{DiscountRule, ItemKey, MutationOutcome, RemoteChange, RemoteRecord};
use thiserror::Error;

pub use http::HttpRemoteStore;
pub use memory::{CallBehavior, InMemoryStore, RemoteCall};

/// Errors that can occur when talking to a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport-level failure (connection refused, reset, DNS).
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// The session token was missing or rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server refused the change (validation, conflict, 5xx).
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Remote persistence for one collection plus coupon lookup.
///
/// Implementations must attach authentication themselves and must return a
/// failure rather than hang; the engine additionally bounds every call with
/// its configured request timeout.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the full authoritative collection.
    fn fetch_collection(&self) -> impl Future<Output = Result<Vec<RemoteRecord>, RemoteError>> + Send;

    /// Apply one change to one key.
    fn apply_mutation(
        &self,
        key: &ItemKey,
        change: RemoteChange,
    ) -> impl Future<Output = Result<MutationOutcome, RemoteError>> + Send;

    /// Look up a coupon by code. `Ok(None)` means the code does not exist.
    fn fetch_coupon(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<DiscountRule>, RemoteError>> + Send;
}
