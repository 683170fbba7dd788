use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::coupons::{self, CouponQuote};
use super::{
    generate_reference, is_unique_violation, stock, Actor, MAX_REFERENCE_ATTEMPTS,
    ORDER_REFERENCE_PREFIX,
};
use crate::entities::order::{self, OrderStatus};
use crate::entities::{app_user, order_coupon, product};
use crate::errors::ServiceError;
use crate::gateway::{
    from_minor_units, ChargeRequest, ClientPaymentParams, PaymentGateway, PaymentNotification,
    WebhookAck,
};
use crate::notifications::{dispatch_in_background, Notification, NotificationDispatcher};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderCommand {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "Participant name is required"))]
    pub participant_name: String,
    #[validate(range(min = 0, max = 120, message = "Participant age must be between 0 and 120"))]
    pub participant_age: Option<i32>,
    #[validate(length(min = 1, max = 32, message = "Participant phone is required"))]
    pub participant_phone: String,
    #[validate(range(min = 1, max = 99, message = "Participant count must be between 1 and 99"))]
    pub participant_count: i32,
    pub travel_date: NaiveDate,
    #[validate(length(max = 500, message = "Remark cannot exceed 500 characters"))]
    pub remark: Option<String>,
    pub coupon_id: Option<Uuid>,
}

/// Order with the product snapshot and the redeemed coupon, if any.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub product: product::Model,
    pub coupon: Option<order_coupon::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    #[serde(flatten)]
    pub order: order::Model,
    /// Trade state reported by the gateway when it was consulted
    pub trade_state: Option<String>,
    pub gateway_checked: bool,
}

/// Result of applying a successful payment to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The order moved to PAID now.
    Applied,
    /// The order was already paid; nothing changed.
    AlreadyApplied,
    /// The order was cancelled before the money arrived; nothing changed.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderSettings {
    /// Take stock when the order is created rather than when it is paid.
    pub reserve_stock_on_create: bool,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
    settings: OrderSettings,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            settings,
        }
    }

    fn notify(&self, notification: Notification) {
        dispatch_in_background(self.notifier.clone(), notification);
    }

    /// Creates a PENDING order, redeeming the coupon in the same transaction.
    #[instrument(skip(self, command, actor), fields(user_id = %actor.user_id, product_id = %command.product_id))]
    pub async fn create_order(
        &self,
        command: CreateOrderCommand,
        actor: &Actor,
    ) -> Result<OrderDetails, ServiceError> {
        command.validate()?;
        let now = Utc::now();
        if command.travel_date < now.date_naive() {
            return Err(ServiceError::ValidationError(
                "Travel date cannot be in the past".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let mut product = product::Entity::find_by_id(command.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", command.product_id))
            })?;

        if !product.is_published {
            return Err(ServiceError::ValidationError(
                "Product is not available for booking".to_string(),
            ));
        }
        if product.stock < command.participant_count {
            return Err(ServiceError::ValidationError(format!(
                "Only {} place(s) left for this product",
                product.stock
            )));
        }
        if product.has_age_bounds() {
            let age = command.participant_age.ok_or_else(|| {
                ServiceError::ValidationError(
                    "Participant age is required for this product".to_string(),
                )
            })?;
            if !product.accepts_age(age) {
                return Err(ServiceError::ValidationError(format!(
                    "Participant age {} is outside the allowed range",
                    age
                )));
            }
        }

        let subtotal = product.price * Decimal::from(command.participant_count);
        let quote: Option<CouponQuote> = match command.coupon_id {
            Some(coupon_id) => {
                Some(coupons::quote_on(&txn, actor.user_id, coupon_id, subtotal, now).await?)
            }
            None => None,
        };
        let total = quote.as_ref().map(|q| q.total).unwrap_or(subtotal);

        let stock_deducted = if self.settings.reserve_stock_on_create {
            if !stock::decrement(&txn, product.id, command.participant_count).await? {
                return Err(ServiceError::Exhausted(
                    "Not enough places left for this product".to_string(),
                ));
            }
            product.stock -= command.participant_count;
            true
        } else {
            false
        };

        let draft = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_no: NotSet,
            user_id: Set(actor.user_id),
            product_id: Set(product.id),
            status: Set(OrderStatus::Pending),
            total_amount: Set(total),
            paid_amount: Set(Decimal::ZERO),
            participant_name: Set(command.participant_name.clone()),
            participant_age: Set(command.participant_age),
            participant_phone: Set(command.participant_phone.clone()),
            participant_count: Set(command.participant_count),
            travel_date: Set(command.travel_date),
            remark: Set(command.remark.clone()),
            transaction_id: Set(None),
            stock_deducted: Set(stock_deducted),
            stock_shortfall: Set(false),
            reminder_sent: Set(false),
            reminder_sent_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            paid_at: Set(None),
            confirmed_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
        };
        let order = insert_with_reference(&txn, draft).await?;

        let coupon = match quote {
            Some(quote) => {
                let applied = order_coupon::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    coupon_id: Set(quote.coupon_id),
                    user_coupon_id: Set(quote.user_coupon_id),
                    discount_amount: Set(quote.discount),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;
                coupons::redeem(&txn, quote.user_coupon_id, order.id, now).await?;
                Some(applied)
            }
            None => None,
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order.id,
            order_no = %order.order_no,
            total = %order.total_amount,
            "Order created"
        );
        Ok(OrderDetails {
            order,
            product,
            coupon,
        })
    }

    /// Cancels a PENDING order and hands back any stock it holds.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order cancellation");
            ServiceError::DatabaseError(e)
        })?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        actor.ensure_can_access(order.user_id)?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order is {} and cannot be cancelled",
                order.status
            )));
        }

        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::CancelledAt, Expr::value(Some(now)))
            .col_expr(order::Column::StockDeducted, Expr::value(false))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order status changed concurrently".to_string(),
            ));
        }

        if order.stock_deducted {
            stock::increment(&txn, order.product_id, order.participant_count).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order cancellation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_no = %order.order_no, restored_stock = order.stock_deducted, "Order cancelled");
        self.notify(Notification::OrderCancelled {
            user_id: order.user_id,
            order_id: order.id,
            order_no: order.order_no.clone(),
        });

        self.load_order(order_id).await
    }

    /// Creates a gateway charge for a PENDING order and returns the client parameters.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn create_payment(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<ClientPaymentParams, ServiceError> {
        let order = self.load_order(order_id).await?;
        actor.ensure_owner(order.user_id)?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order is {} and cannot be paid",
                order.status
            )));
        }

        let user = app_user::Entity::find_by_id(order.user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", order.user_id)))?;
        let payer_account_id = user
            .payment_account_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "No payment account is linked to this user".to_string(),
                )
            })?;

        let description = product::Entity::find_by_id(order.product_id)
            .one(&*self.db)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| order.order_no.clone());

        let prepay = self
            .gateway
            .create_charge(&ChargeRequest {
                order_no: order.order_no.clone(),
                description,
                amount: order.total_amount,
                payer_account_id,
            })
            .await
            .map_err(|e| {
                warn!(error = %e, order_no = %order.order_no, "Charge creation failed");
                ServiceError::from(e)
            })?;

        info!(order_no = %order.order_no, "Charge created");
        Ok(self.gateway.client_payment_params(&prepay))
    }

    /// Applies a verified payment callback. Never fails; the acknowledgment carries the result.
    #[instrument(skip(self, notification), fields(order_no = %notification.order_no, event_id = %notification.event_id))]
    pub async fn handle_payment_notify(&self, notification: PaymentNotification) -> WebhookAck {
        if !notification.trade_state.is_success() {
            info!(
                trade_state = notification.trade_state.as_str(),
                "Ignoring non-success payment callback"
            );
            return WebhookAck::fail(format!(
                "trade state {}",
                notification.trade_state.as_str()
            ));
        }

        match self
            .apply_payment_success(
                &notification.order_no,
                notification.transaction_id.clone(),
                notification.amount_total,
            )
            .await
        {
            Ok(outcome) => {
                debug!(?outcome, "Payment callback handled");
                WebhookAck::success()
            }
            Err(ServiceError::NotFound(message)) => {
                warn!(%message, "Payment callback for unknown order");
                WebhookAck::fail(message)
            }
            Err(e) => {
                error!(error = %e, "Payment callback processing failed");
                WebhookAck::fail("processing error")
            }
        }
    }

    /// Pull-based reconciliation: asks the gateway when the order is still PENDING.
    #[instrument(skip(self, actor), fields(order_no = %order_no))]
    pub async fn query_payment_status(
        &self,
        order_no: &str,
        actor: &Actor,
    ) -> Result<PaymentStatusView, ServiceError> {
        let order = self.get_order_by_no(order_no, actor).await?;
        if order.status != OrderStatus::Pending {
            return Ok(PaymentStatusView {
                order,
                trade_state: None,
                gateway_checked: false,
            });
        }

        let result = self.gateway.query_order(order_no).await?;
        if result.trade_state.is_success() {
            let outcome = self
                .apply_payment_success(order_no, result.transaction_id.clone(), result.amount_total)
                .await?;
            info!(?outcome, "Payment confirmed by status query");
        }

        Ok(PaymentStatusView {
            order: self.load_order_by_no(order_no).await?,
            trade_state: Some(result.trade_state.as_str().to_string()),
            gateway_checked: true,
        })
    }

    /// PENDING → PAID with the stock and booking side effects, at most once per order.
    async fn apply_payment_success(
        &self,
        order_no: &str,
        transaction_id: Option<String>,
        amount_minor: Option<i64>,
    ) -> Result<PaymentOutcome, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment");
            ServiceError::DatabaseError(e)
        })?;

        let order = order::Entity::find()
            .filter(order::Column::OrderNo.eq(order_no))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_no)))?;

        match order.status {
            OrderStatus::Pending => {}
            status if status.is_paid_or_later() => {
                debug!(%status, "Payment already applied");
                return Ok(PaymentOutcome::AlreadyApplied);
            }
            status => {
                warn!(%status, "Payment reported for an order that is no longer payable; refund manually");
                return Ok(PaymentOutcome::Ignored);
            }
        }

        let paid_amount = amount_minor
            .map(from_minor_units)
            .unwrap_or(order.total_amount);
        if paid_amount != order.total_amount {
            warn!(
                expected = %order.total_amount,
                reported = %paid_amount,
                "Paid amount differs from order total"
            );
        }

        let (holds_stock, shortfall) = if order.stock_deducted {
            (true, false)
        } else if stock::decrement(&txn, order.product_id, order.participant_count).await? {
            (true, false)
        } else {
            error!(
                product_id = %order.product_id,
                requested = order.participant_count,
                "Order paid but stock is exhausted"
            );
            (false, true)
        };

        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::PaidAmount, Expr::value(paid_amount))
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(order::Column::TransactionId, Expr::value(transaction_id))
            .col_expr(order::Column::StockDeducted, Expr::value(holds_stock))
            .col_expr(order::Column::StockShortfall, Expr::value(shortfall))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            // Lost the race; dropping the transaction undoes the decrement.
            return Ok(PaymentOutcome::AlreadyApplied);
        }

        stock::record_booking(&txn, order.product_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit payment transition");
            ServiceError::DatabaseError(e)
        })?;

        info!(paid = %paid_amount, shortfall, "Order paid");
        self.notify(Notification::OrderPaid {
            user_id: order.user_id,
            order_id: order.id,
            order_no: order.order_no.clone(),
            amount: paid_amount,
        });
        if shortfall {
            self.notify(Notification::StockShortfall {
                order_id: order.id,
                order_no: order.order_no.clone(),
                product_id: order.product_id,
                requested: order.participant_count,
            });
        }
        Ok(PaymentOutcome::Applied)
    }

    pub async fn get_order(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self.load_order(order_id).await?;
        actor.ensure_can_access(order.user_id)?;

        let product = product::Entity::find_by_id(order.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", order.product_id)))?;
        let coupon = order_coupon::Entity::find()
            .filter(order_coupon::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?;
        Ok(OrderDetails {
            order,
            product,
            coupon,
        })
    }

    pub async fn get_order_by_no(
        &self,
        order_no: &str,
        actor: &Actor,
    ) -> Result<order::Model, ServiceError> {
        let order = self.load_order_by_no(order_no).await?;
        actor.ensure_can_access(order.user_id)?;
        Ok(order)
    }

    /// The actor's orders, newest first. `page` is 1-based.
    pub async fn list_user_orders(
        &self,
        actor: &Actor,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find()
            .filter(order::Column::UserId.eq(actor.user_id))
            .order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// PAID → CONFIRMED, recorded by an operator.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn confirm_order(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<order::Model, ServiceError> {
        self.advance_status(order_id, OrderStatus::Paid, OrderStatus::Confirmed, actor)
            .await
    }

    /// CONFIRMED → COMPLETED, recorded by an operator.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn complete_order(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<order::Model, ServiceError> {
        self.advance_status(order_id, OrderStatus::Confirmed, OrderStatus::Completed, actor)
            .await
    }

    async fn advance_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        actor: &Actor,
    ) -> Result<order::Model, ServiceError> {
        actor.ensure_admin()?;
        let order = self.load_order(order_id).await?;

        let now = Utc::now();
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        update = match to {
            OrderStatus::Confirmed => {
                update.col_expr(order::Column::ConfirmedAt, Expr::value(Some(now)))
            }
            OrderStatus::Completed => {
                update.col_expr(order::Column::CompletedAt, Expr::value(Some(now)))
            }
            _ => update,
        };
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order is {} and cannot move to {}",
                order.status, to
            )));
        }

        info!(order_no = %order.order_no, %from, %to, "Order status advanced");
        self.load_order(order_id).await
    }

    /// Sends the pre-travel reminder once. Returns `false` when it was already sent or the
    /// order is not in a remindable state.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn send_travel_reminder(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let order = self.load_order(order_id).await?;

        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::ReminderSent, Expr::value(true))
            .col_expr(order::Column::ReminderSentAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ReminderSent.eq(false))
            .filter(order::Column::Status.is_in([OrderStatus::Paid, OrderStatus::Confirmed]))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Ok(false);
        }

        self.notify(Notification::TravelReminder {
            user_id: order.user_id,
            order_id: order.id,
            order_no: order.order_no.clone(),
            travel_date: order.travel_date,
        });
        Ok(true)
    }

    /// Paid orders travelling in `[today, today + lead_days]` that have not been reminded.
    pub async fn reminder_candidates(
        &self,
        today: NaiveDate,
        lead_days: i64,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let until = today + chrono::Duration::days(lead_days);
        let orders = order::Entity::find()
            .filter(order::Column::Status.is_in([OrderStatus::Paid, OrderStatus::Confirmed]))
            .filter(order::Column::ReminderSent.eq(false))
            .filter(order::Column::TravelDate.between(today, until))
            .order_by_asc(order::Column::TravelDate)
            .limit(limit)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn load_order_by_no(&self, order_no: &str) -> Result<order::Model, ServiceError> {
        order::Entity::find()
            .filter(order::Column::OrderNo.eq(order_no))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_no)))
    }
}

/// Inserts the order under a fresh reference, retrying inside a savepoint on collision.
async fn insert_with_reference(
    txn: &DatabaseTransaction,
    draft: order::ActiveModel,
) -> Result<order::Model, ServiceError> {
    for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
        let mut model = draft.clone();
        model.order_no = Set(generate_reference(ORDER_REFERENCE_PREFIX, Utc::now()));

        let savepoint = txn.begin().await?;
        match model.insert(&savepoint).await {
            Ok(order) => {
                savepoint.commit().await?;
                return Ok(order);
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(attempt, "Order reference collision; retrying");
                savepoint.rollback().await?;
            }
            Err(e) => {
                error!(error = %e, "Failed to insert order");
                return Err(ServiceError::DatabaseError(e));
            }
        }
    }
    Err(ServiceError::InternalError(
        "Could not allocate a unique order reference".to_string(),
    ))
}
