pub mod checkout;
pub mod orders;

use crate::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};

/// Builds the versioned API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/checkout/attempts", post(checkout::begin_attempt))
        .route("/api/v1/checkout/attempts/:id", get(checkout::get_attempt))
        .route(
            "/api/v1/checkout/attempts/:id/address",
            put(checkout::set_address),
        )
        .route(
            "/api/v1/checkout/attempts/:id/coupon",
            post(checkout::apply_coupon).delete(checkout::remove_coupon),
        )
        .route(
            "/api/v1/checkout/attempts/:id/wallet",
            put(checkout::set_wallet),
        )
        .route(
            "/api/v1/checkout/attempts/:id/submit",
            post(checkout::submit),
        )
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "ok"
}
