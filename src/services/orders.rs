//! Order persistence: creates the order aggregate exactly once per checkout
//! attempt, atomically with its line items.

use crate::{
    db::DbPool,
    entities::order::{self, OrderStatus},
    entities::order_line,
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponDiscount,
    services::pricing::{self, CartLine, ShippingTier},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Shipping address snapshot taken from the address book. Treated as opaque
/// input: no postal-code validation or geocoding happens here.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub full_name: String,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub label: Option<String>,
}

/// Everything the writer needs to build an order row and its lines.
#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub user_id: Uuid,
    /// Checkout attempt placing this order; recorded on the row so a
    /// resubmission of the same attempt finds the order it already created
    pub attempt_id: Option<Uuid>,
    pub lines: Vec<CartLine>,
    pub address: ShippingAddress,
    pub shipping_tier: ShippingTier,
    /// Actual fee to charge; differs from `shipping_tier.fee()` on retry
    pub shipping_fee: Decimal,
    pub lucky_discount: Decimal,
    pub coupon: Option<CouponDiscount>,
    pub payment_method: Option<String>,
    /// Payable amount for a zero-line order (wallet top-up variant). Ignored
    /// when lines are present.
    pub custom_amount: Option<Decimal>,
}

/// How the writer satisfied a placement request. Retry callers must be able
/// to tell a reused order from a silently recreated one.
#[derive(Debug, Clone)]
pub enum OrderPlacement {
    Created(order::Model),
    Reused(order::Model),
    RecreatedAfterMissing(order::Model),
}

impl OrderPlacement {
    pub fn order(&self) -> &order::Model {
        match self {
            OrderPlacement::Created(o)
            | OrderPlacement::Reused(o)
            | OrderPlacement::RecreatedAfterMissing(o) => o,
        }
    }

    pub fn into_order(self) -> order::Model {
        match self {
            OrderPlacement::Created(o)
            | OrderPlacement::Reused(o)
            | OrderPlacement::RecreatedAfterMissing(o) => o,
        }
    }

    pub fn was_recreated(&self) -> bool {
        matches!(self, OrderPlacement::RecreatedAfterMissing(_))
    }
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a new order plus its lines in a single database transaction.
    /// A line insertion failure rolls the whole order back; no orphaned
    /// order row survives.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, line_count = input.lines.len()))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<order::Model, ServiceError> {
        input
            .address
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let subtotal = if input.lines.is_empty() {
            // Wallet top-up variant: no lines, explicit amount.
            input.custom_amount.ok_or_else(|| {
                ServiceError::InvalidInput(
                    "An order needs either line items or an explicit amount".to_string(),
                )
            })?
        } else {
            pricing::validate_lines(&input.lines)?;
            input.lines.iter().map(CartLine::line_total).sum()
        };

        let discount_total = input.lucky_discount
            + input
                .coupon
                .as_ref()
                .map(|c| c.amount)
                .unwrap_or(Decimal::ZERO);
        // Same formula as pricing::compute_totals, applied to the subtotal
        // the writer is about to persist.
        let total = (subtotal + input.shipping_fee - discount_total).max(Decimal::ZERO);

        let db = &*self.db_pool;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_active = order::ActiveModel {
            id: Set(order_id),
            display_order_id: Set(format!(
                "ORD-{}",
                order_id.to_string()[..8].to_uppercase()
            )),
            user_id: Set(input.user_id),
            checkout_attempt_id: Set(input.attempt_id),
            status: Set(OrderStatus::Pending.to_string()),
            subtotal: Set(subtotal),
            shipping_fee: Set(input.shipping_fee),
            discount_total: Set(discount_total),
            lucky_discount: Set(input.lucky_discount),
            coupon_code: Set(input.coupon.as_ref().map(|c| c.code.clone())),
            coupon_name: Set(input.coupon.as_ref().map(|c| c.name.clone())),
            coupon_amount: Set(input.coupon.as_ref().map(|c| c.amount)),
            total: Set(total),
            payment_method: Set(input.payment_method.clone()),
            shipping_method: Set(input.shipping_tier.to_string()),
            ship_to_name: Set(input.address.full_name.clone()),
            ship_to_phone: Set(input.address.phone.clone()),
            ship_address: Set(input.address.address.clone()),
            ship_city: Set(input.address.city.clone()),
            ship_state: Set(input.address.state.clone()),
            ship_postal_code: Set(input.address.postal_code.clone()),
            ship_country: Set(input.address.country.clone()),
            estimated_delivery: Set(now
                + Duration::days(i64::from(input.shipping_tier.max_delivery_days()))),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order_model = order_active.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        for line in &input.lines {
            let line_active = order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                product_name: Set(line.name.clone()),
                brand: Set(line.brand.clone()),
                image_url: Set(line.image_url.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity as i32),
                line_total: Set(line.line_total()),
                created_at: Set(now),
            };
            line_active.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, product_id = %line.product_id, "failed to create order line");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            display_order_id = %order_model.display_order_id,
            total = %order_model.total,
            "order created"
        );

        if let Some(event_sender) = &self.event_sender {
            event_sender.send(Event::OrderCreated(order_id)).await;
        }

        Ok(order_model)
    }

    /// Places an order for a checkout attempt, exactly once per attempt.
    ///
    /// An order already written by this attempt (a resubmission after a
    /// settlement failure) is found through its attempt link and reused.
    /// With `original_order_id` set (retry flow) the stored order is reused
    /// unchanged when found, preserving its totals and lucky discount. When
    /// it has expired or been deleted, a replacement is created from the
    /// retry snapshot; the fallback is logged, evented, and visible to the
    /// caller through the returned placement.
    #[instrument(skip(self, input))]
    pub async fn create_or_get_order(
        &self,
        original_order_id: Option<Uuid>,
        input: CreateOrderInput,
    ) -> Result<OrderPlacement, ServiceError> {
        if let Some(attempt_id) = input.attempt_id {
            if let Some(existing) = self.get_order_for_attempt(attempt_id).await? {
                info!(
                    order_id = %existing.id,
                    attempt_id = %attempt_id,
                    "reusing order already written by this attempt"
                );
                return Ok(OrderPlacement::Reused(existing));
            }
        }

        if let Some(original) = original_order_id {
            if let Some(existing) = self.get_order(original).await? {
                info!(order_id = %original, "reusing existing order for retried payment");
                return Ok(OrderPlacement::Reused(existing));
            }

            warn!(
                order_id = %original,
                "original order missing for retry; creating replacement from snapshot"
            );
            let order = self.create_order(input).await?;
            if let Some(event_sender) = &self.event_sender {
                event_sender
                    .send(Event::RetryOrderRecreated {
                        original_order_id: original,
                        new_order_id: order.id,
                    })
                    .await;
            }
            return Ok(OrderPlacement::RecreatedAfterMissing(order));
        }

        let order = self.create_order(input).await?;
        Ok(OrderPlacement::Created(order))
    }

    /// Order previously written by the given checkout attempt, if any.
    pub async fn get_order_for_attempt(
        &self,
        attempt_id: Uuid,
    ) -> Result<Option<order::Model>, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::CheckoutAttemptId.eq(attempt_id))
            .one(&*self.db_pool)
            .await?;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?;
        Ok(order)
    }

    /// Line items for an order, in insertion order.
    pub async fn get_order_lines(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_line::Model>, ServiceError> {
        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Ok(lines)
    }
}
