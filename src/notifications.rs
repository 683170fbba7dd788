//! Best-effort user notifications.
//!
//! Services hand a [`Notification`] to [`dispatch_in_background`] after their transaction has
//! committed. Delivery failures are logged and never reach the caller.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{Event, EventSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    OrderPaid {
        user_id: Uuid,
        order_id: Uuid,
        order_no: String,
        amount: Decimal,
    },
    OrderCancelled {
        user_id: Uuid,
        order_id: Uuid,
        order_no: String,
    },
    RefundApproved {
        user_id: Uuid,
        refund_id: Uuid,
        refund_no: String,
        amount: Decimal,
    },
    RefundRejected {
        user_id: Uuid,
        refund_id: Uuid,
        refund_no: String,
        note: Option<String>,
    },
    RefundCompleted {
        user_id: Uuid,
        refund_id: Uuid,
        refund_no: String,
        amount: Decimal,
    },
    RefundFailed {
        user_id: Uuid,
        refund_id: Uuid,
        refund_no: String,
        reason: String,
    },
    TravelReminder {
        user_id: Uuid,
        order_id: Uuid,
        order_no: String,
        travel_date: NaiveDate,
    },
    /// Operator alert: an order was paid while its stock was gone.
    StockShortfall {
        order_id: Uuid,
        order_no: String,
        product_id: Uuid,
        requested: i32,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderPaid { .. } => "order_paid",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::RefundApproved { .. } => "refund_approved",
            Self::RefundRejected { .. } => "refund_rejected",
            Self::RefundCompleted { .. } => "refund_completed",
            Self::RefundFailed { .. } => "refund_failed",
            Self::TravelReminder { .. } => "travel_reminder",
            Self::StockShortfall { .. } => "stock_shortfall",
        }
    }

    /// End user the message is addressed to; `None` for operator alerts.
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            Self::OrderPaid { user_id, .. }
            | Self::OrderCancelled { user_id, .. }
            | Self::RefundApproved { user_id, .. }
            | Self::RefundRejected { user_id, .. }
            | Self::RefundCompleted { user_id, .. }
            | Self::RefundFailed { user_id, .. }
            | Self::TravelReminder { user_id, .. } => Some(*user_id),
            Self::StockShortfall { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification channel closed: {0}")]
    ChannelClosed(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Forwards notifications onto the application event channel.
#[derive(Debug, Clone)]
pub struct EventNotificationDispatcher {
    sender: EventSender,
}

impl EventNotificationDispatcher {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl NotificationDispatcher for EventNotificationDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), NotificationError> {
        let event = match &notification {
            Notification::StockShortfall {
                order_no,
                requested,
                ..
            } => Event::ReconciliationRequired {
                order_no: order_no.clone(),
                reason: format!("paid without stock for {} participant(s)", requested),
            },
            _ => Event::NotificationRequested(notification),
        };
        self.sender
            .send(event)
            .await
            .map_err(NotificationError::ChannelClosed)
    }
}

/// Spawns delivery and returns immediately; failures are only logged.
pub fn dispatch_in_background(dispatcher: Arc<dyn NotificationDispatcher>, notification: Notification) {
    let kind = notification.kind();
    tokio::spawn(async move {
        match dispatcher.dispatch(notification).await {
            Ok(()) => debug!(kind, "notification dispatched"),
            Err(e) => warn!(kind, error = %e, "notification dispatch failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn user_notifications_become_notification_events() {
        let (sender, mut rx) = events::channel(4);
        let dispatcher = EventNotificationDispatcher::new(sender);
        let user_id = Uuid::new_v4();

        dispatcher
            .dispatch(Notification::OrderPaid {
                user_id,
                order_id: Uuid::new_v4(),
                order_no: "ORD202403011200001234".into(),
                amount: dec!(180),
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Event::NotificationRequested(n) => {
                assert_eq!(n.kind(), "order_paid");
                assert_eq!(n.recipient(), Some(user_id));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn shortfall_becomes_reconciliation_event() {
        let (sender, mut rx) = events::channel(4);
        let dispatcher = EventNotificationDispatcher::new(sender);

        dispatcher
            .dispatch(Notification::StockShortfall {
                order_id: Uuid::new_v4(),
                order_no: "ORD1".into(),
                product_id: Uuid::new_v4(),
                requested: 3,
            })
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::ReconciliationRequired { ref order_no, .. } if order_no == "ORD1"
        ));
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let (sender, rx) = events::channel(1);
        drop(rx);
        let dispatcher = EventNotificationDispatcher::new(sender);
        let err = dispatcher
            .dispatch(Notification::OrderCancelled {
                user_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
                order_no: "ORD1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::ChannelClosed(_)));
    }
}
