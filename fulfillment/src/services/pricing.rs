// fulfillment/src/services/pricing.rs

use crate::models::{Coupon, CouponKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
  pub base_price_cents: i32,
  pub discount_cents: i32,
  pub final_price_cents: i32,
}

impl PriceQuote {
  pub fn is_free(&self) -> bool {
    self.final_price_cents == 0
  }
}

/// `base - discount`, never below zero.
pub fn final_price(base_price_cents: i32, discount_cents: i32) -> i32 {
  base_price_cents.saturating_sub(discount_cents).max(0)
}

/// Discount granted by `coupon` on `base_price_cents`. Negative coupon amounts count as zero.
pub fn discount_for(base_price_cents: i32, coupon: &Coupon) -> i32 {
  match coupon.kind {
    CouponKind::Percent => {
      let percent = i64::from(coupon.amount.clamp(0, 100));
      (i64::from(base_price_cents.max(0)) * percent / 100) as i32
    }
    CouponKind::Fixed => coupon.amount.max(0),
  }
}

pub fn quote(base_price_cents: i32, coupon: Option<&Coupon>) -> PriceQuote {
  let discount_cents = coupon.map_or(0, |c| discount_for(base_price_cents, c));
  PriceQuote {
    base_price_cents,
    discount_cents,
    final_price_cents: final_price(base_price_cents, discount_cents),
  }
}
