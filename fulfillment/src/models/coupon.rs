// fulfillment/src/models/coupon.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "coupon_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
  /// `amount` is a percentage of the base price (0-100).
  Percent,
  /// `amount` is a flat discount in cents.
  Fixed,
}

/// Discount code. Owned by the marketing side; this service only reads it and
/// bumps `times_used` when an order carrying it becomes `paid`, never past
/// `max_uses`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Coupon {
  pub code: String,
  pub kind: CouponKind,
  pub amount: i32,
  pub max_uses: Option<i32>,
  pub times_used: i32,
  pub active: bool,
  pub expires_at: Option<DateTime<Utc>>,
}

impl Coupon {
  pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
    self.active
      && self.expires_at.map_or(true, |expires| expires > now)
      && self.has_uses_left()
  }

  pub fn has_uses_left(&self) -> bool {
    self.max_uses.map_or(true, |max| self.times_used < max)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn coupon() -> Coupon {
    Coupon {
      code: "XMAS".to_string(),
      kind: CouponKind::Percent,
      amount: 20,
      max_uses: Some(2),
      times_used: 0,
      active: true,
      expires_at: None,
    }
  }

  #[test]
  fn redeemable_until_expired_exhausted_or_disabled() {
    let now = Utc::now();
    assert!(coupon().is_redeemable(now));

    let expired = Coupon {
      expires_at: Some(now - Duration::minutes(1)),
      ..coupon()
    };
    assert!(!expired.is_redeemable(now));

    let exhausted = Coupon {
      times_used: 2,
      ..coupon()
    };
    assert!(!exhausted.is_redeemable(now));

    let disabled = Coupon {
      active: false,
      ..coupon()
    };
    assert!(!disabled.is_redeemable(now));
  }
}
