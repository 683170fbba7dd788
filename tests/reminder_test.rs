mod common;

use std::time::Duration;

use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use studytrip_api::{
    entities::{
        coupon::CouponType,
        order::{self, OrderStatus},
        user_coupon::{self, UserCouponStatus},
    },
    services::{reminders::ReminderScheduler, Actor},
};
use uuid::Uuid;

use common::{order_command, payment_success, travel_date_in, TestApp};

fn scheduler(app: &TestApp, lead_days: i64) -> ReminderScheduler {
    ReminderScheduler::new(
        (*app.state.services.orders).clone(),
        (*app.state.services.coupons).clone(),
        lead_days,
        50,
        Duration::from_secs(60),
    )
}

async fn paid_order_travelling_in(app: &TestApp, actor: &Actor, days: i64) -> order::Model {
    let product = app.seed_product(dec!(120), 10).await;
    let mut command = order_command(product.id, 1, None);
    command.travel_date = travel_date_in(days);
    let created = app
        .state
        .services
        .orders
        .create_order(command, actor)
        .await
        .unwrap()
        .order;
    let ack = app
        .state
        .services
        .orders
        .handle_payment_notify(payment_success(&created, "txn-reminder"))
        .await;
    assert!(ack.is_success());
    app.order(created.id).await
}

#[tokio::test]
async fn reminder_is_sent_once_per_order() {
    let app = TestApp::new().await;
    let actor = Actor::customer(app.seed_user().await.id);
    let soon = paid_order_travelling_in(&app, &actor, 1).await;
    let later = paid_order_travelling_in(&app, &actor, 20).await;
    let unpaid_product = app.seed_product(dec!(80), 5).await;
    let mut command = order_command(unpaid_product.id, 1, None);
    command.travel_date = travel_date_in(1);
    app.state
        .services
        .orders
        .create_order(command, &actor)
        .await
        .unwrap();

    let scheduler = scheduler(&app, 3);
    let first = scheduler.run_once().await.unwrap();
    assert_eq!(first.candidates, 1);
    assert_eq!(first.sent, 1);

    let second = scheduler.run_once().await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(second.sent, 0);

    assert!(app.order(soon.id).await.reminder_sent);
    assert!(!app.order(later.id).await.reminder_sent);
    assert_eq!(app.notifier.wait_for("travel_reminder", 1).await, 1);
}

#[tokio::test]
async fn direct_reminder_is_idempotent_and_skips_unpaid_orders() {
    let app = TestApp::new().await;
    let actor = Actor::customer(app.seed_user().await.id);
    let orders = &app.state.services.orders;
    let paid = paid_order_travelling_in(&app, &actor, 2).await;
    assert_eq!(paid.status, OrderStatus::Paid);

    assert!(orders.send_travel_reminder(paid.id).await.unwrap());
    assert!(!orders.send_travel_reminder(paid.id).await.unwrap());
    assert!(app.order(paid.id).await.reminder_sent_at.is_some());

    let product = app.seed_product(dec!(60), 5).await;
    let pending = app.create_order(&actor, product.id, 1, None).await;
    assert!(!orders.send_travel_reminder(pending.id).await.unwrap());
}

#[tokio::test]
async fn sweep_expires_lapsed_claims() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let coupon = app
        .seed_coupon(CouponType::Amount, dec!(10), 5, None, None)
        .await;
    let claim = app
        .state
        .services
        .coupons
        .claim_coupon(user_id, coupon.id)
        .await
        .unwrap();

    let mut lapsed: user_coupon::ActiveModel = claim.into();
    lapsed.expires_at = Set(common::hours_ago(2));
    let lapsed = lapsed.update(&*app.db).await.unwrap();

    let report = scheduler(&app, 3).run_once().await.unwrap();
    assert_eq!(report.expired_claims, 1);

    let stored = user_coupon::Entity::find_by_id(lapsed.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, UserCouponStatus::Expired);
}
