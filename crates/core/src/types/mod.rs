//! Core types for cartsync.
//!
//! This module provides type-safe wrappers for the cart and wishlist domain.

pub mod collection;
pub mod discount;
pub mod key;
pub mod price;
pub mod record;

pub use collection::CollectionKind;
pub use discount::{DiscountRule, DiscountType};
pub use key::ItemKey;
pub use price::{CurrencyCode, Price};
pub use record::{MutationOutcome, ProductListing, RemoteChange, RemoteRecord};
