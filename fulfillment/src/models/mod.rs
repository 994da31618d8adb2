// fulfillment/src/models/mod.rs

//! Persistent entities of the fulfillment service.

pub mod coupon;
pub mod order;

pub use coupon::{Coupon, CouponKind};
pub use order::{BehaviorCategory, ChildGender, ChildProfile, InvoiceDetails, NewOrder, Order, OrderStatus, StatusAudit};
