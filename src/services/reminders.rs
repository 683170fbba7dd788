//! Periodic sweep: pre-travel reminders and coupon claim expiry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::coupons::CouponService;
use super::orders::OrderService;
use crate::config::AppConfig;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderRunReport {
    pub candidates: usize,
    pub sent: usize,
    pub expired_claims: u64,
}

pub struct ReminderScheduler {
    orders: OrderService,
    coupons: CouponService,
    lead_days: i64,
    batch_size: u64,
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(
        orders: OrderService,
        coupons: CouponService,
        lead_days: i64,
        batch_size: u64,
        interval: Duration,
    ) -> Self {
        Self {
            orders,
            coupons,
            lead_days,
            batch_size,
            interval,
        }
    }

    pub fn from_config(orders: OrderService, coupons: CouponService, config: &AppConfig) -> Self {
        Self::new(
            orders,
            coupons,
            config.reminder_lead_days,
            config.reminder_batch_size,
            config.reminder_interval(),
        )
    }

    /// One sweep. A failed reminder is logged and left for the next sweep.
    pub async fn run_once(&self) -> Result<ReminderRunReport, ServiceError> {
        let now = Utc::now();
        let candidates = self
            .orders
            .reminder_candidates(now.date_naive(), self.lead_days, self.batch_size)
            .await?;

        let mut report = ReminderRunReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        for order in candidates {
            match self.orders.send_travel_reminder(order.id).await {
                Ok(true) => report.sent += 1,
                Ok(false) => debug!(order_no = %order.order_no, "Reminder already sent"),
                Err(e) => warn!(order_no = %order.order_no, error = %e, "Reminder failed"),
            }
        }

        report.expired_claims = self.coupons.expire_claims(now).await?;
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Starting reminder scheduler");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.sent > 0 || report.expired_claims > 0 => info!(
                        sent = report.sent,
                        candidates = report.candidates,
                        expired_claims = report.expired_claims,
                        "Reminder sweep finished"
                    ),
                    Ok(_) => debug!("Reminder sweep found nothing to do"),
                    Err(e) => error!(error = %e, "Reminder sweep failed"),
                }
            }
        })
    }
}
