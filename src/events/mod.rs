use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::notifications::Notification;

/// Things that happened in the booking core and are consumed off the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A user-facing message is ready for delivery.
    NotificationRequested(Notification),
    /// A paid order could not be matched with stock and needs an operator.
    ReconciliationRequired {
        order_no: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel until every sender is dropped. Returns the number of events seen.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> usize {
    info!("Starting event processing loop");
    let mut processed = 0;

    while let Some(event) = rx.recv().await {
        processed += 1;
        match event {
            Event::NotificationRequested(notification) => {
                info!(
                    kind = notification.kind(),
                    recipient = ?notification.recipient(),
                    "Delivering notification"
                );
            }
            Event::ReconciliationRequired { order_no, reason } => {
                error!(order_no = %order_no, reason = %reason, "Order requires manual reconciliation");
            }
        }
    }

    warn!(processed, "Event channel closed; event processing stopped");
    processed
}
