// tests/pricing_properties.rs

use fulfillment::models::{Coupon, CouponKind, OrderStatus};
use fulfillment::services::pricing::{final_price, quote};
use proptest::prelude::*;

fn coupon_strategy() -> impl Strategy<Value = Coupon> {
  (prop_oneof![Just(CouponKind::Percent), Just(CouponKind::Fixed)], -100i32..20_000).prop_map(|(kind, amount)| Coupon {
    code: "PROP".to_string(),
    kind,
    amount,
    max_uses: None,
    times_used: 0,
    active: true,
    expires_at: None,
  })
}

proptest! {
  #[test]
  fn final_price_is_base_minus_discount_clamped(base in 0i32..1_000_000, discount in 0i32..2_000_000) {
    let price = final_price(base, discount);
    prop_assert_eq!(price, (base - discount).max(0));
    prop_assert!(price >= 0);
  }

  #[test]
  fn quotes_never_go_negative_or_exceed_base(base in 0i32..100_000, coupon in proptest::option::of(coupon_strategy())) {
    let q = quote(base, coupon.as_ref());
    prop_assert_eq!(q.base_price_cents, base);
    prop_assert!(q.discount_cents >= 0);
    prop_assert!(q.final_price_cents >= 0);
    prop_assert!(q.final_price_cents <= base);
    prop_assert_eq!(q.final_price_cents, (base - q.discount_cents).max(0));
    prop_assert_eq!(q.is_free(), q.final_price_cents == 0);
  }

  #[test]
  fn only_forward_edges_or_failure_are_allowed(from_idx in 0usize..6, to_idx in 0usize..6) {
    let from = OrderStatus::FORWARD_PATH[from_idx];
    let to = OrderStatus::FORWARD_PATH[to_idx];
    prop_assert_eq!(from.can_transition_to(to), to_idx == from_idx + 1);
    prop_assert_eq!(from.can_transition_to(OrderStatus::Failed), from != OrderStatus::Completed);
    prop_assert!(!OrderStatus::Failed.can_transition_to(to));
  }
}
