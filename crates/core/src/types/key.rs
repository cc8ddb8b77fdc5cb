//! Stable keys for cached line items.
//!
//! Remote stores identify cart lines and wishlist entries either by a product
//! handle or by a numeric product id. Both are normalised into an [`ItemKey`]
//! so the cache never has to care which one it was given.

use serde::{Deserialize, Serialize};

/// Identifier of the product or line an entry mirrors.
///
/// # Example
///
/// ```rust
/// # use cartsync_core::ItemKey;
/// let by_handle = ItemKey::from("p1");
/// let by_id = ItemKey::from(42_i64);
///
/// assert_eq!(by_handle.as_str(), "p1");
/// assert_eq!(by_id.to_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    /// Create a key from anything string-like.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the underlying string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ::core::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ItemKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<i64> for ItemKey {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<ItemKey> for String {
    fn from(key: ItemKey) -> Self {
        key.0
    }
}
