use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    generate_reference, is_unique_violation, stock, Actor, MAX_REFERENCE_ATTEMPTS,
    REFUND_REFERENCE_PREFIX,
};
use crate::entities::order::{self, OrderStatus};
use crate::entities::refund::{self, RefundStatus};
use crate::errors::ServiceError;
use crate::gateway::{PaymentGateway, RefundNotification, RefundRequest, WebhookAck};
use crate::notifications::{dispatch_in_background, Notification, NotificationDispatcher};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRefundCommand {
    pub order_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 200, message = "Refund reason must be 1-200 characters"))]
    pub reason: String,
    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundDecision {
    Approved,
    Rejected,
}

#[derive(Clone)]
pub struct RefundService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl RefundService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
        }
    }

    fn notify(&self, notification: Notification) {
        dispatch_in_background(self.notifier.clone(), notification);
    }

    /// Opens a PENDING refund request. At most one refund per order may be in flight.
    #[instrument(skip(self, command, actor), fields(order_id = %command.order_id, user_id = %actor.user_id))]
    pub async fn create_refund(
        &self,
        command: CreateRefundCommand,
        actor: &Actor,
    ) -> Result<refund::Model, ServiceError> {
        command.validate()?;
        if command.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Refund amount must be greater than zero".to_string(),
            ));
        }

        let order = order::Entity::find_by_id(command.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", command.order_id))
            })?;
        actor.ensure_owner(order.user_id)?;
        if command.amount > order.paid_amount {
            return Err(ServiceError::ValidationError(format!(
                "Refund amount {} exceeds the paid amount {}",
                command.amount, order.paid_amount
            )));
        }
        if order.status != OrderStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "Order is {} and cannot be refunded",
                order.status
            )));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for refund creation");
            ServiceError::DatabaseError(e)
        })?;

        let now = Utc::now();
        // Touching the order row serialises concurrent requests for the same order.
        let touched = order::Entity::update_many()
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::Paid))
            .exec(&txn)
            .await?;
        if touched.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order status changed concurrently".to_string(),
            ));
        }

        let in_flight = refund::Entity::find()
            .filter(refund::Column::OrderId.eq(order.id))
            .filter(refund::Column::Status.is_in(RefundStatus::active_states()))
            .one(&txn)
            .await?;
        if let Some(existing) = in_flight {
            return Err(ServiceError::Conflict(format!(
                "Refund {} is already {} for this order",
                existing.refund_no, existing.status
            )));
        }

        let draft = refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            user_id: Set(order.user_id),
            status: Set(RefundStatus::Pending),
            amount: Set(command.amount),
            reason: Set(command.reason.clone()),
            description: Set(command.description.clone()),
            admin_note: Set(None),
            gateway_refund_id: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            approved_at: Set(None),
            rejected_at: Set(None),
            processing_at: Set(None),
            completed_at: Set(None),
            failed_at: Set(None),
            ..Default::default()
        };
        let refund = insert_with_reference(&txn, draft).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit refund creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(refund_no = %refund.refund_no, amount = %refund.amount, "Refund requested");
        Ok(refund)
    }

    /// Records the operator's decision. Approval submits the refund to the gateway.
    #[instrument(skip(self, note, actor), fields(refund_id = %refund_id, ?decision))]
    pub async fn process_refund(
        &self,
        refund_id: Uuid,
        decision: RefundDecision,
        note: Option<String>,
        actor: &Actor,
    ) -> Result<refund::Model, ServiceError> {
        actor.ensure_admin()?;
        let refund = self.load_refund(refund_id).await?;
        let now = Utc::now();

        let (target, stamp) = match decision {
            RefundDecision::Approved => (RefundStatus::Approved, refund::Column::ApprovedAt),
            RefundDecision::Rejected => (RefundStatus::Rejected, refund::Column::RejectedAt),
        };
        let result = refund::Entity::update_many()
            .col_expr(refund::Column::Status, Expr::value(target))
            .col_expr(stamp, Expr::value(Some(now)))
            .col_expr(refund::Column::AdminNote, Expr::value(note.clone()))
            .col_expr(refund::Column::UpdatedAt, Expr::value(now))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::Status.eq(RefundStatus::Pending))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Refund is {} and cannot be processed",
                refund.status
            )));
        }

        match decision {
            RefundDecision::Rejected => {
                info!(refund_no = %refund.refund_no, "Refund rejected");
                self.notify(Notification::RefundRejected {
                    user_id: refund.user_id,
                    refund_id: refund.id,
                    refund_no: refund.refund_no.clone(),
                    note,
                });
                self.load_refund(refund_id).await
            }
            RefundDecision::Approved => {
                info!(refund_no = %refund.refund_no, "Refund approved");
                self.notify(Notification::RefundApproved {
                    user_id: refund.user_id,
                    refund_id: refund.id,
                    refund_no: refund.refund_no.clone(),
                    amount: refund.amount,
                });
                let approved = self.load_refund(refund_id).await?;
                self.submit_to_gateway(approved).await
            }
        }
    }

    /// Re-submits an APPROVED or FAILED refund whose order is still paid.
    #[instrument(skip(self, actor), fields(refund_id = %refund_id))]
    pub async fn retry_refund(
        &self,
        refund_id: Uuid,
        actor: &Actor,
    ) -> Result<refund::Model, ServiceError> {
        actor.ensure_admin()?;
        let refund = self.load_refund(refund_id).await?;
        let order = self.load_order(refund.order_id).await?;
        if !OrderStatus::refundable_states().contains(&order.status) {
            return Err(ServiceError::Conflict(format!(
                "Order is {} and cannot be refunded",
                order.status
            )));
        }

        match refund.status {
            RefundStatus::Approved => {}
            RefundStatus::Failed => {
                let others = refund::Entity::find()
                    .filter(refund::Column::OrderId.eq(order.id))
                    .filter(refund::Column::Id.ne(refund.id))
                    .filter(refund::Column::Status.is_in(RefundStatus::active_states()))
                    .one(&*self.db)
                    .await?;
                if others.is_some() {
                    return Err(ServiceError::Conflict(
                        "Another refund is in flight for this order".to_string(),
                    ));
                }

                let now = Utc::now();
                let result = refund::Entity::update_many()
                    .col_expr(refund::Column::Status, Expr::value(RefundStatus::Approved))
                    .col_expr(refund::Column::FailureReason, Expr::value(None::<String>))
                    .col_expr(
                        refund::Column::FailedAt,
                        Expr::value(None::<chrono::DateTime<Utc>>),
                    )
                    .col_expr(refund::Column::UpdatedAt, Expr::value(now))
                    .filter(refund::Column::Id.eq(refund.id))
                    .filter(refund::Column::Status.eq(RefundStatus::Failed))
                    .exec(&*self.db)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(ServiceError::Conflict(
                        "Refund status changed concurrently".to_string(),
                    ));
                }
            }
            status => {
                return Err(ServiceError::Conflict(format!(
                    "Refund is {} and cannot be retried",
                    status
                )));
            }
        }

        info!(refund_no = %refund.refund_no, "Retrying refund");
        let approved = self.load_refund(refund_id).await?;
        self.submit_to_gateway(approved).await
    }

    /// Calls the gateway for an APPROVED refund. No transaction is held across the call.
    async fn submit_to_gateway(
        &self,
        refund: refund::Model,
    ) -> Result<refund::Model, ServiceError> {
        let order = self.load_order(refund.order_id).await?;
        let request = RefundRequest {
            refund_no: refund.refund_no.clone(),
            order_no: order.order_no.clone(),
            transaction_id: order.transaction_id.clone(),
            refund_amount: refund.amount,
            order_amount: order.paid_amount,
            reason: refund.reason.clone(),
        };

        match self.gateway.create_refund(&request).await {
            Ok(accepted) => {
                let now = Utc::now();
                let result = refund::Entity::update_many()
                    .col_expr(refund::Column::Status, Expr::value(RefundStatus::Processing))
                    .col_expr(
                        refund::Column::GatewayRefundId,
                        Expr::value(Some(accepted.gateway_refund_id.clone())),
                    )
                    .col_expr(refund::Column::ProcessingAt, Expr::value(Some(now)))
                    .col_expr(refund::Column::UpdatedAt, Expr::value(now))
                    .filter(refund::Column::Id.eq(refund.id))
                    .filter(refund::Column::Status.eq(RefundStatus::Approved))
                    .exec(&*self.db)
                    .await?;
                if result.rows_affected == 0 {
                    // The callback overtook the submission response.
                    debug!(refund_no = %refund.refund_no, "Refund already settled by callback");
                }
                info!(
                    refund_no = %refund.refund_no,
                    gateway_refund_id = %accepted.gateway_refund_id,
                    gateway_status = %accepted.status,
                    "Refund accepted by gateway"
                );
                self.load_refund(refund.id).await
            }
            Err(e) if !e.is_rejection() => {
                // Timeouts, unsigned answers and unreadable answers leave the outcome unknown.
                warn!(refund_no = %refund.refund_no, error = %e, "Refund outcome unknown; refund stays approved");
                Err(ServiceError::from(e))
            }
            Err(e) => {
                let reason = e.to_string();
                error!(refund_no = %refund.refund_no, %reason, "Gateway rejected refund");
                let now = Utc::now();
                let result = refund::Entity::update_many()
                    .col_expr(refund::Column::Status, Expr::value(RefundStatus::Failed))
                    .col_expr(refund::Column::FailureReason, Expr::value(Some(reason.clone())))
                    .col_expr(refund::Column::FailedAt, Expr::value(Some(now)))
                    .col_expr(refund::Column::UpdatedAt, Expr::value(now))
                    .filter(refund::Column::Id.eq(refund.id))
                    .filter(refund::Column::Status.eq(RefundStatus::Approved))
                    .exec(&*self.db)
                    .await?;
                if result.rows_affected == 1 {
                    self.notify(Notification::RefundFailed {
                        user_id: refund.user_id,
                        refund_id: refund.id,
                        refund_no: refund.refund_no.clone(),
                        reason,
                    });
                }
                Err(ServiceError::from(e))
            }
        }
    }

    /// Applies a verified refund callback. Never fails; the acknowledgment carries the result.
    #[instrument(skip(self, notification), fields(refund_no = %notification.refund_no, event_id = %notification.event_id))]
    pub async fn handle_refund_notify(&self, notification: RefundNotification) -> WebhookAck {
        match self.apply_refund_result(&notification).await {
            Ok(()) => WebhookAck::success(),
            Err(ServiceError::NotFound(message)) => {
                warn!(%message, "Refund callback for unknown refund");
                WebhookAck::fail(message)
            }
            Err(e) => {
                error!(error = %e, "Refund callback processing failed");
                WebhookAck::fail("processing error")
            }
        }
    }

    async fn apply_refund_result(
        &self,
        notification: &RefundNotification,
    ) -> Result<(), ServiceError> {
        let refund = refund::Entity::find()
            .filter(refund::Column::RefundNo.eq(notification.refund_no.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Refund {} not found", notification.refund_no))
            })?;

        if refund.status == RefundStatus::Completed {
            debug!("Refund already completed");
            return Ok(());
        }
        if !RefundStatus::settleable_states().contains(&refund.status) {
            warn!(
                status = %refund.status,
                succeeded = notification.succeeded,
                gateway_status = %notification.refund_status,
                "Refund callback for a refund that is not in flight; needs manual follow-up"
            );
            return Ok(());
        }

        if notification.succeeded {
            self.complete_refund(&refund, notification.gateway_refund_id.clone())
                .await
        } else {
            self.fail_refund(&refund, &notification.refund_status).await
        }
    }

    async fn complete_refund(
        &self,
        refund: &refund::Model,
        gateway_refund_id: Option<String>,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for refund completion");
            ServiceError::DatabaseError(e)
        })?;

        let now = Utc::now();
        let mut update = refund::Entity::update_many()
            .col_expr(refund::Column::Status, Expr::value(RefundStatus::Completed))
            .col_expr(refund::Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(refund::Column::UpdatedAt, Expr::value(now));
        if let Some(id) = gateway_refund_id {
            update = update.col_expr(refund::Column::GatewayRefundId, Expr::value(Some(id)));
        }
        let result = update
            .filter(refund::Column::Id.eq(refund.id))
            .filter(refund::Column::Status.is_in(RefundStatus::settleable_states()))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            debug!(refund_no = %refund.refund_no, "Refund settled concurrently");
            return Ok(());
        }

        let order = order::Entity::find_by_id(refund.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", refund.order_id)))?;
        let moved = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Refunded))
            .col_expr(order::Column::StockDeducted, Expr::value(false))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.is_in(OrderStatus::refundable_states()))
            .exec(&txn)
            .await?;
        let restored = moved.rows_affected == 1 && order.stock_deducted;
        if restored {
            stock::increment(&txn, order.product_id, order.participant_count).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit refund completion");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            refund_no = %refund.refund_no,
            order_no = %order.order_no,
            restored_stock = restored,
            "Refund completed"
        );
        self.notify(Notification::RefundCompleted {
            user_id: refund.user_id,
            refund_id: refund.id,
            refund_no: refund.refund_no.clone(),
            amount: refund.amount,
        });
        Ok(())
    }

    async fn fail_refund(
        &self,
        refund: &refund::Model,
        gateway_status: &str,
    ) -> Result<(), ServiceError> {
        let reason = format!("gateway reported {}", gateway_status);
        let now = Utc::now();
        let result = refund::Entity::update_many()
            .col_expr(refund::Column::Status, Expr::value(RefundStatus::Failed))
            .col_expr(refund::Column::FailureReason, Expr::value(Some(reason.clone())))
            .col_expr(refund::Column::FailedAt, Expr::value(Some(now)))
            .col_expr(refund::Column::UpdatedAt, Expr::value(now))
            .filter(refund::Column::Id.eq(refund.id))
            .filter(refund::Column::Status.is_in(RefundStatus::settleable_states()))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Ok(());
        }

        warn!(refund_no = %refund.refund_no, %reason, "Refund failed");
        self.notify(Notification::RefundFailed {
            user_id: refund.user_id,
            refund_id: refund.id,
            refund_no: refund.refund_no.clone(),
            reason,
        });
        Ok(())
    }

    pub async fn get_refund(
        &self,
        refund_id: Uuid,
        actor: &Actor,
    ) -> Result<refund::Model, ServiceError> {
        let refund = self.load_refund(refund_id).await?;
        actor.ensure_can_access(refund.user_id)?;
        Ok(refund)
    }

    /// Refunds of one order, newest first.
    pub async fn list_order_refunds(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<refund::Model>, ServiceError> {
        let order = self.load_order(order_id).await?;
        actor.ensure_can_access(order.user_id)?;
        let refunds = refund::Entity::find()
            .filter(refund::Column::OrderId.eq(order_id))
            .order_by_desc(refund::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(refunds)
    }

    async fn load_refund(&self, refund_id: Uuid) -> Result<refund::Model, ServiceError> {
        refund::Entity::find_by_id(refund_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Refund {} not found", refund_id)))
    }

    async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

async fn insert_with_reference(
    txn: &DatabaseTransaction,
    draft: refund::ActiveModel,
) -> Result<refund::Model, ServiceError> {
    for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
        let mut model = draft.clone();
        model.refund_no = Set(generate_reference(REFUND_REFERENCE_PREFIX, Utc::now()));

        let savepoint = txn.begin().await?;
        match model.insert(&savepoint).await {
            Ok(refund) => {
                savepoint.commit().await?;
                return Ok(refund);
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(attempt, "Refund reference collision; retrying");
                savepoint.rollback().await?;
            }
            Err(e) => {
                error!(error = %e, "Failed to insert refund");
                return Err(ServiceError::DatabaseError(e));
            }
        }
    }
    Err(ServiceError::InternalError(
        "Could not allocate a unique refund reference".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decision_uses_upper_case_wire_names() {
        let approved: RefundDecision = serde_json::from_str("\"APPROVED\"").unwrap();
        assert_eq!(approved, RefundDecision::Approved);
        assert_eq!(
            serde_json::to_string(&RefundDecision::Rejected).unwrap(),
            "\"REJECTED\""
        );
    }

    #[test]
    fn refund_reason_is_bounded() {
        let mut command = CreateRefundCommand {
            order_id: Uuid::new_v4(),
            amount: dec!(10),
            reason: String::new(),
            description: None,
        };
        assert!(command.validate().is_err());
        command.reason = "x".repeat(201);
        assert!(command.validate().is_err());
        command.reason = "schedule change".into();
        assert!(command.validate().is_ok());
    }
}
