//! Property-based tests for pricing and reference helpers.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use studytrip_api::{
    entities::coupon::CouponType,
    gateway::{from_minor_units, to_minor_units},
    services::{coupons::compute_discount, generate_reference},
};

fn cents() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|minor| Decimal::new(minor, 2))
}

fn percent() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000).prop_map(|basis| Decimal::new(basis, 2))
}

proptest! {
    #[test]
    fn percent_discount_stays_within_amount_and_cap(
        amount in cents(),
        value in percent(),
        cap in proptest::option::of(cents()),
    ) {
        let discount = compute_discount(CouponType::Percent, value, cap, amount);
        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= amount);
        if let Some(cap) = cap {
            prop_assert!(discount <= cap);
        }
        prop_assert!(discount.scale() <= 2);
    }

    #[test]
    fn amount_discount_is_value_or_whole_order(amount in cents(), value in cents()) {
        let discount = compute_discount(CouponType::Amount, value, None, amount);
        prop_assert_eq!(discount, value.min(amount));
        prop_assert!(amount - discount >= Decimal::ZERO);
    }

    #[test]
    fn minor_units_match_cents(minor in 0i64..1_000_000_000) {
        prop_assert_eq!(to_minor_units(from_minor_units(minor)).unwrap(), minor);
    }

    #[test]
    fn references_have_fixed_shape(seconds in 0i64..4_000_000_000) {
        let now = Utc.timestamp_opt(seconds, 0).unwrap();
        let reference = generate_reference("ORD", now);
        prop_assert_eq!(reference.len(), 21);
        prop_assert!(reference.starts_with("ORD"));
        prop_assert!(reference[3..].chars().all(|c| c.is_ascii_digit()));
        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        prop_assert_eq!(&reference[3..17], stamp.as_str());
    }
}
