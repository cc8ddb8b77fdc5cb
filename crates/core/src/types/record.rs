//! Normalized records exchanged with a remote store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ItemKey;

/// Authoritative state of one line as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// Product or line key.
    pub key: ItemKey,
    /// Quantity the server holds.
    pub quantity: u32,
    /// Current selling price per unit.
    pub unit_price: Decimal,
    /// List price per unit before any markdown.
    pub original_unit_price: Decimal,
    /// Maximum quantity the server will accept. Zero means out of stock.
    pub stock_limit: u32,
}

/// Catalog data for a product that is not cached yet.
///
/// Callers supply this when adding a product so the optimistic entry can be
/// priced before the server answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListing {
    pub key: ItemKey,
    pub unit_price: Decimal,
    pub original_unit_price: Decimal,
    pub stock_limit: u32,
}

impl ProductListing {
    /// Listing whose list price equals its selling price.
    #[must_use]
    pub fn new(key: impl Into<ItemKey>, unit_price: Decimal, stock_limit: u32) -> Self {
        Self {
            key: key.into(),
            unit_price,
            original_unit_price: unit_price,
            stock_limit,
        }
    }

    /// Override the list price.
    #[must_use]
    pub const fn with_original_price(mut self, original_unit_price: Decimal) -> Self {
        self.original_unit_price = original_unit_price;
        self
    }
}

impl From<&RemoteRecord> for ProductListing {
    fn from(record: &RemoteRecord) -> Self {
        Self {
            key: record.key.clone(),
            unit_price: record.unit_price,
            original_unit_price: record.original_unit_price,
            stock_limit: record.stock_limit,
        }
    }
}

/// A write sent to the remote store for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op", content = "quantity")]
pub enum RemoteChange {
    /// Set the line to exactly this quantity.
    Set(u32),
    /// Delete the line.
    Remove,
}

/// What the remote store reports after applying a [`RemoteChange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The line exists with this authoritative state.
    Updated(RemoteRecord),
    /// The line no longer exists.
    Removed,
}
