//! sea-orm entities for the booking core.
//!
//! `product` and `app_user` belong to the surrounding catalogue and account systems; the
//! engine only reads them, apart from the stock and booking counters on `products`.

pub mod app_user;
pub mod coupon;
pub mod order;
pub mod order_coupon;
pub mod product;
pub mod refund;
pub mod user_coupon;
