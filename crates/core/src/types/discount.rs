//! Coupon and discount rule definitions.
//!
//! A [`DiscountRule`] is data only. Evaluating a rule against a cart lives in
//! the engine's pricing module so it can stay a pure function of
//! (cart, rule, clock).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ItemKey;

/// How a coupon's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `value` is a percentage of the subtotal.
    Percentage,
    /// `value` is a flat amount off the subtotal.
    Fixed,
}

/// A coupon as issued by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountRule {
    /// Code the customer types.
    pub code: String,
    pub discount_type: DiscountType,
    /// Percentage (0-100) or flat amount depending on `discount_type`.
    pub value: Decimal,
    /// Subtotal required before the coupon applies.
    #[serde(default)]
    pub min_order_amount: Decimal,
    /// Cap on percentage discounts.
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// Total redemptions allowed across all customers.
    #[serde(default)]
    pub usage_limit: Option<u32>,
    /// Redemptions recorded by the server so far.
    #[serde(default)]
    pub times_used: u32,
    /// When set, the cart must contain at least one of these keys.
    #[serde(default)]
    pub applicable_keys: Option<BTreeSet<ItemKey>>,
}

impl DiscountRule {
    /// A percentage coupon with no restrictions.
    #[must_use]
    pub fn percentage(code: impl Into<String>, percent: Decimal) -> Self {
        Self::unrestricted(code.into(), DiscountType::Percentage, percent)
    }

    /// A flat-amount coupon with no restrictions.
    #[must_use]
    pub fn fixed(code: impl Into<String>, amount: Decimal) -> Self {
        Self::unrestricted(code.into(), DiscountType::Fixed, amount)
    }

    const fn unrestricted(code: String, discount_type: DiscountType, value: Decimal) -> Self {
        Self {
            code,
            discount_type,
            value,
            min_order_amount: Decimal::ZERO,
            max_discount_amount: None,
            valid_from: None,
            valid_until: None,
            usage_limit: None,
            times_used: 0,
            applicable_keys: None,
        }
    }

    #[must_use]
    pub const fn with_min_order(mut self, amount: Decimal) -> Self {
        self.min_order_amount = amount;
        self
    }

    #[must_use]
    pub const fn with_max_discount(mut self, amount: Decimal) -> Self {
        self.max_discount_amount = Some(amount);
        self
    }

    #[must_use]
    pub const fn with_validity(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    #[must_use]
    pub const fn with_usage(mut self, limit: u32, used: u32) -> Self {
        self.usage_limit = Some(limit);
        self.times_used = used;
        self
    }

    #[must_use]
    pub fn restricted_to<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ItemKey>,
    {
        self.applicable_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}
