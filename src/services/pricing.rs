//! Pure totals computation for a checkout attempt.
//!
//! Nothing here touches the database: the same inputs always produce the
//! same totals, so quotes can be recomputed on every user adjustment without
//! drifting from values already committed to an order.

use crate::errors::ServiceError;
use crate::services::coupons::CouponDiscount;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A cart line as submitted by the client. Prices are snapshots taken when
/// the item entered the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub brand: Option<String>,
    pub image_url: Option<String>,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Rejects carts the pricing engine cannot quote: empty carts, zero
/// quantities, negative price snapshots.
pub fn validate_lines(lines: &[CartLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::InvalidInput("Cart is empty".to_string()));
    }
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::InvalidInput(format!(
                "Quantity for {} must be at least 1",
                line.name
            )));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(format!(
                "Price snapshot for {} is negative",
                line.name
            )));
        }
    }
    Ok(())
}

/// Fixed shipping tiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShippingTier {
    #[default]
    Standard,
    Express,
    Priority,
}

impl ShippingTier {
    /// Flat fee per tier, in rupees.
    pub fn fee(self) -> Decimal {
        match self {
            ShippingTier::Standard => Decimal::ZERO,
            ShippingTier::Express => Decimal::from(99),
            ShippingTier::Priority => Decimal::from(199),
        }
    }

    /// Delivery window in days (min, max).
    pub fn delivery_window(self) -> (u8, u8) {
        match self {
            ShippingTier::Standard => (5, 7),
            ShippingTier::Express => (2, 3),
            ShippingTier::Priority => (1, 1),
        }
    }

    pub fn max_delivery_days(self) -> u8 {
        self.delivery_window().1
    }
}

/// Computed totals for one checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount_total: Decimal,
    pub final_total: Decimal,
}

/// Computes the payable amount for a cart.
///
/// `shipping_fee` is taken as a value rather than a tier so a retried order
/// can charge its original stored fee instead of re-pricing shipping.
/// Discounts stack additively and the result floors at zero.
pub fn compute_totals(
    lines: &[CartLine],
    shipping_fee: Decimal,
    lucky_discount: Decimal,
    coupon: Option<&CouponDiscount>,
) -> Totals {
    let subtotal: Decimal = lines.iter().map(CartLine::line_total).sum();
    let coupon_amount = coupon.map(|c| c.amount).unwrap_or(Decimal::ZERO);
    let discount_total = lucky_discount + coupon_amount;
    let final_total = (subtotal + shipping_fee - discount_total).max(Decimal::ZERO);

    Totals {
        subtotal,
        shipping_fee,
        discount_total,
        final_total,
    }
}

/// Draws the per-attempt "lucky" discount: a random amount in the open
/// interval (0, 1] rupees, at paise precision. Drawn once per attempt and
/// carried over unchanged when an order is retried.
pub fn draw_lucky_discount() -> Decimal {
    let paise: i64 = rand::thread_rng().gen_range(1..=100);
    Decimal::new(paise, 2)
}
