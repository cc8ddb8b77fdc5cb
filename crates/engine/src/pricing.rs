//! Totals derived from cache contents and the active coupon.
//!
//! Everything here is a pure function of its arguments: the engine re-runs
//! [`compute_totals`] after every cache change and the result is advisory.
//! The remote store confirms the real discount at checkout.

use std::collections::BTreeSet;

use cartsync_core::{DiscountRule, DiscountType, ItemKey};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::cache::CacheEntry;
use crate::config::PricingConfig;
use crate::error::CouponIssue;

/// Derived money values for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    /// Sum of line totals over visible, in-stock entries.
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    /// Markdown against list prices, shown separately from coupon discounts.
    pub savings: Decimal,
    /// Units counted in the subtotal.
    pub item_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponEvaluation>,
}

/// Outcome of evaluating the active coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponEvaluation {
    pub code: String,
    pub discount: Decimal,
    /// Why the coupon yields nothing right now.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "issue_text")]
    pub issue: Option<CouponIssue>,
}

impl CouponEvaluation {
    #[must_use]
    pub const fn is_applicable(&self) -> bool {
        self.issue.is_none()
    }
}

#[allow(clippy::ref_option)] // serde's serialize_with signature
fn issue_text<S: serde::Serializer>(
    issue: &Option<CouponIssue>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match issue {
        Some(issue) => serializer.serialize_str(&issue.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Compute subtotal, discount, shipping, and total.
///
/// Entries pending removal and out-of-stock entries are excluded from the
/// subtotal. `now` is used only for the coupon validity window.
pub fn compute_totals<'a>(
    entries: impl IntoIterator<Item = &'a CacheEntry>,
    coupon: Option<&DiscountRule>,
    pricing: &PricingConfig,
    now: DateTime<Utc>,
) -> Totals {
    let mut subtotal = Decimal::ZERO;
    let mut savings = Decimal::ZERO;
    let mut item_count: u32 = 0;
    let mut present = BTreeSet::new();

    for entry in entries {
        if entry.is_removed() || !entry.in_stock() {
            continue;
        }
        subtotal += entry.line_total();
        savings += entry.line_savings();
        item_count = item_count.saturating_add(entry.quantity);
        present.insert(&entry.key);
    }

    let coupon = coupon.map(|rule| {
        let (discount, issue) = match evaluate_coupon(rule, subtotal, &present, now) {
            Ok(discount) => (discount, None),
            Err(issue) => (Decimal::ZERO, Some(issue)),
        };
        CouponEvaluation {
            code: rule.code.clone(),
            discount,
            issue,
        }
    });
    let discount = coupon.as_ref().map_or(Decimal::ZERO, |c| c.discount);
    let shipping = shipping_for(subtotal - discount, item_count, pricing);
    let total = (subtotal - discount + shipping).max(Decimal::ZERO);

    Totals {
        subtotal,
        discount,
        shipping,
        total,
        savings,
        item_count,
        coupon,
    }
}

/// Discount granted by `rule` on `subtotal`, or the reason it grants nothing.
///
/// # Errors
///
/// Returns the [`CouponIssue`] that makes the coupon inapplicable.
pub fn evaluate_coupon(
    rule: &DiscountRule,
    subtotal: Decimal,
    present: &BTreeSet<&ItemKey>,
    now: DateTime<Utc>,
) -> Result<Decimal, CouponIssue> {
    if rule.valid_from.is_some_and(|from| now < from) {
        return Err(CouponIssue::NotYetValid);
    }
    if rule.valid_until.is_some_and(|until| now > until) {
        return Err(CouponIssue::Expired);
    }
    if rule.usage_limit.is_some_and(|limit| rule.times_used >= limit) {
        return Err(CouponIssue::UsageLimitReached);
    }
    if let Some(keys) = &rule.applicable_keys
        && !keys.iter().any(|key| present.contains(key))
    {
        return Err(CouponIssue::NoApplicableItems);
    }
    if subtotal < rule.min_order_amount {
        return Err(CouponIssue::BelowMinimum {
            required: rule.min_order_amount,
            subtotal,
        });
    }

    let discount = match rule.discount_type {
        DiscountType::Percentage => {
            let raw = subtotal * rule.value / Decimal::ONE_HUNDRED;
            rule.max_discount_amount.map_or(raw, |cap| raw.min(cap))
        }
        DiscountType::Fixed => rule.value.min(subtotal),
    };
    Ok(discount
        .max(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn shipping_for(discounted: Decimal, item_count: u32, pricing: &PricingConfig) -> Decimal {
    if item_count == 0 {
        return Decimal::ZERO;
    }
    match pricing.free_shipping_threshold {
        Some(threshold) if discounted >= threshold => Decimal::ZERO,
        _ => pricing.shipping_fee,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::cache::PendingOp;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    fn entry(key: &str, price: i64, quantity: u32, stock: u32) -> CacheEntry {
        CacheEntry {
            key: ItemKey::from(key),
            quantity,
            unit_price: Decimal::new(price, 0),
            original_unit_price: Decimal::new(price, 0),
            stock_limit: stock,
            pending_op: PendingOp::None,
            version: 1,
        }
    }

    fn totals(entries: &[CacheEntry], coupon: Option<&DiscountRule>) -> Totals {
        compute_totals(entries, coupon, &PricingConfig::default(), now())
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let entries = vec![entry("p1", 250, 2, 5), entry("p2", 99, 1, 3)];
        let rule = DiscountRule::percentage("TEN", Decimal::TEN);
        assert_eq!(totals(&entries, Some(&rule)), totals(&entries, Some(&rule)));
    }

    #[test]
    fn test_out_of_stock_and_removed_excluded() {
        let mut removed = entry("p3", 1000, 1, 5);
        removed.pending_op = PendingOp::Remove;
        let entries = vec![entry("p1", 100, 2, 10), entry("p2", 500, 1, 0), removed];

        let totals = totals(&entries, None);
        assert_eq!(totals.subtotal, Decimal::new(200, 0));
        assert_eq!(totals.item_count, 2);
    }

    #[test]
    fn test_fixed_coupon_respects_minimum_order() {
        let rule = DiscountRule::fixed("FLAT500", Decimal::new(500, 0))
            .with_min_order(Decimal::new(1000, 0));

        let low = totals(&[entry("p1", 800, 1, 5)], Some(&rule));
        assert_eq!(low.discount, Decimal::ZERO);
        assert_eq!(
            low.coupon.unwrap().issue,
            Some(CouponIssue::BelowMinimum {
                required: Decimal::new(1000, 0),
                subtotal: Decimal::new(800, 0),
            })
        );

        let high = totals(&[entry("p1", 1200, 1, 5)], Some(&rule));
        assert_eq!(high.discount, Decimal::new(500, 0));
        assert_eq!(high.total, Decimal::new(700, 0));
    }

    #[test]
    fn test_percentage_coupon_is_capped() {
        let rule = DiscountRule::percentage("SAVE20", Decimal::new(20, 0))
            .with_max_discount(Decimal::new(300, 0));
        let totals = totals(&[entry("p1", 1000, 2, 5)], Some(&rule));
        assert_eq!(totals.subtotal, Decimal::new(2000, 0));
        assert_eq!(totals.discount, Decimal::new(300, 0));
    }

    #[test]
    fn test_fixed_coupon_never_exceeds_subtotal() {
        let rule = DiscountRule::fixed("BIG", Decimal::new(500, 0));
        let totals = totals(&[entry("p1", 120, 1, 5)], Some(&rule));
        assert_eq!(totals.discount, Decimal::new(120, 0));
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn test_validity_window_and_usage() {
        let entries = [entry("p1", 500, 1, 5)];
        let expired = DiscountRule::fixed("OLD", Decimal::TEN)
            .with_validity(None, Some(now() - chrono::Duration::days(1)));
        let future = DiscountRule::fixed("SOON", Decimal::TEN)
            .with_validity(Some(now() + chrono::Duration::days(1)), None);
        let used_up = DiscountRule::fixed("USED", Decimal::TEN).with_usage(100, 100);

        let issue = |rule: &DiscountRule| totals(&entries, Some(rule)).coupon.unwrap().issue;
        assert_eq!(issue(&expired), Some(CouponIssue::Expired));
        assert_eq!(issue(&future), Some(CouponIssue::NotYetValid));
        assert_eq!(issue(&used_up), Some(CouponIssue::UsageLimitReached));
    }

    #[test]
    fn test_restricted_coupon_needs_an_applicable_key() {
        let rule = DiscountRule::percentage("TEES", Decimal::TEN).restricted_to(["tee"]);
        let without = totals(&[entry("mug", 300, 1, 5)], Some(&rule));
        assert_eq!(
            without.coupon.unwrap().issue,
            Some(CouponIssue::NoApplicableItems)
        );

        let with = totals(&[entry("mug", 300, 1, 5), entry("tee", 700, 1, 5)], Some(&rule));
        assert_eq!(with.discount, Decimal::new(100, 0));
    }

    #[test]
    fn test_shipping_fee_and_free_threshold() {
        let pricing = PricingConfig {
            shipping_fee: Decimal::new(49, 0),
            free_shipping_threshold: Some(Decimal::new(499, 0)),
            ..PricingConfig::default()
        };
        let below = compute_totals(&[entry("p1", 300, 1, 5)], None, &pricing, now());
        assert_eq!(below.shipping, Decimal::new(49, 0));
        assert_eq!(below.total, Decimal::new(349, 0));

        let above = compute_totals(&[entry("p1", 500, 1, 5)], None, &pricing, now());
        assert_eq!(above.shipping, Decimal::ZERO);

        let empty = compute_totals(std::iter::empty(), None, &pricing, now());
        assert_eq!(empty.total, Decimal::ZERO);
    }
}
