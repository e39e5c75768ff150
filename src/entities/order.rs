use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Order aggregate. Money invariant:
/// `total = max(0, subtotal + shipping_fee - discount_total)`.
///
/// The shipping address and coupon are snapshotted onto the row so later
/// address-book or catalog edits cannot change historical orders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-facing identifier, e.g. `ORD-1A2B3C4D`
    #[sea_orm(unique)]
    pub display_order_id: String,

    pub user_id: Uuid,

    /// Checkout attempt that created this order. Unique, so one attempt can
    /// never write two orders even across interleaved submissions.
    #[sea_orm(unique)]
    pub checkout_attempt_id: Option<Uuid>,

    pub status: String,

    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    /// Sum of all applied discounts (lucky + coupon)
    pub discount_total: Decimal,
    /// Randomized per-checkout discount, preserved verbatim on retry
    pub lucky_discount: Decimal,
    pub coupon_code: Option<String>,
    pub coupon_name: Option<String>,
    pub coupon_amount: Option<Decimal>,
    pub total: Decimal,

    pub payment_method: Option<String>,
    pub shipping_method: String,

    pub ship_to_name: String,
    pub ship_to_phone: String,
    pub ship_address: String,
    pub ship_city: String,
    pub ship_state: String,
    pub ship_postal_code: String,
    pub ship_country: String,

    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLine,
    #[sea_orm(has_many = "super::payment_transaction::Entity")]
    PaymentTransaction,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLine.def()
    }
}

impl Related<super::payment_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentTransaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Closed vocabulary for `Model::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Failed,
}

impl Model {
    pub fn status(&self) -> Option<OrderStatus> {
        self.status.parse().ok()
    }
}
