//! Engine error types.
//!
//! [`SyncError`] is what callers see, either as the synchronous return value
//! of a rejected mutation or inside a failure notification. Remote adapters
//! report [`RemoteError`](crate::remote::RemoteError), which is folded into
//! `SyncError` at the engine boundary.

use cartsync_core::ItemKey;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::remote::RemoteError;

/// Why an active coupon currently yields no discount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponIssue {
    #[error("order subtotal {subtotal} is below the minimum of {required}")]
    BelowMinimum { required: Decimal, subtotal: Decimal },

    #[error("coupon is not valid yet")]
    NotYetValid,

    #[error("coupon has expired")]
    Expired,

    #[error("coupon usage limit reached")]
    UsageLimitReached,

    #[error("no eligible items in the collection")]
    NoApplicableItems,
}

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The remote call failed or timed out. The optimistic change was rolled back.
    #[error("Network failure: {0}")]
    NetworkFailure(RemoteError),

    /// The requested quantity is above what the server allows.
    #[error("Requested quantity {requested} for {key} exceeds stock limit {limit}")]
    StockExceeded {
        key: ItemKey,
        requested: u32,
        limit: u32,
    },

    /// The active coupon no longer applies to the collection.
    #[error("Coupon {code} is not applicable: {reason}")]
    StaleCoupon { code: String, reason: CouponIssue },

    /// No session is active; the mutation never touched the cache.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The key is not in the cache and no listing was supplied.
    #[error("Unknown item: {0}")]
    UnknownKey(ItemKey),

    /// The remote store has no coupon with this code.
    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    /// The engine was disposed.
    #[error("Engine has been disposed")]
    Disposed,
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized => Self::NotAuthenticated,
            other => Self::NetworkFailure(other),
        }
    }
}

/// Result type alias for `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
