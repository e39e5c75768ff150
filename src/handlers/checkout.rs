//! HTTP surface for the checkout director.
//!
//! Sessions live in an in-process store keyed by attempt id, expiring
//! after a period of inactivity; every
//! adjustment returns a fresh quote so the payable amount display stays
//! live. Authentication happens upstream; the begin request carries the
//! already-resolved user identity.

use crate::{
    errors::ServiceError,
    services::checkout::{
        payment_button_label, CheckoutContext, CheckoutOutcome, CheckoutSession, CheckoutState,
    },
    services::orders::ShippingAddress,
    services::pricing::{ShippingTier, Totals},
    services::settlement::PaymentMethod,
    services::wallet::WalletAllocation,
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct BeginAttemptRequest {
    pub user_id: Option<Uuid>,
    pub context: CheckoutContext,
    #[serde(default)]
    pub shipping_tier: ShippingTier,
}

#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub session: CheckoutSession,
    pub totals: Totals,
}

impl AttemptView {
    fn of(session: CheckoutSession) -> Self {
        let totals = session.quote();
        Self { session, totals }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SetWalletRequest {
    pub use_wallet: bool,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub allocation: WalletAllocation,
    /// "Pay ₹X" when a gateway remainder exists, "Pay with Wallet" otherwise
    pub payment_button: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default = "default_method")]
    pub method: PaymentMethod,
}

fn default_method() -> PaymentMethod {
    PaymentMethod::Upi
}

fn load_session(state: &AppState, id: Uuid) -> Result<CheckoutSession, ServiceError> {
    state
        .sessions
        .get(&id)
        .ok_or_else(|| ServiceError::NotFound(format!("Checkout attempt {id} not found")))
}

pub async fn begin_attempt(
    State(state): State<AppState>,
    Json(req): Json<BeginAttemptRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AttemptView>>), ServiceError> {
    let session = state
        .checkout_service
        .begin(req.user_id, req.context, req.shipping_tier)
        .await?;
    state.sessions.insert(session.clone());
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(AttemptView::of(session))),
    ))
}

pub async fn get_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AttemptView>>, ServiceError> {
    let session = load_session(&state, id)?;
    Ok(Json(ApiResponse::ok(AttemptView::of(session))))
}

pub async fn set_address(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(address): Json<ShippingAddress>,
) -> Result<Json<ApiResponse<AttemptView>>, ServiceError> {
    let mut session = load_session(&state, id)?;
    state.checkout_service.set_address(&mut session, address)?;
    state.sessions.insert(session.clone());
    Ok(Json(ApiResponse::ok(AttemptView::of(session))))
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<Json<ApiResponse<AttemptView>>, ServiceError> {
    let mut session = load_session(&state, id)?;
    state
        .checkout_service
        .apply_coupon(&mut session, &req.code)
        .await?;
    state.sessions.insert(session.clone());
    Ok(Json(ApiResponse::ok(AttemptView::of(session))))
}

pub async fn remove_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AttemptView>>, ServiceError> {
    let mut session = load_session(&state, id)?;
    state.checkout_service.remove_coupon(&mut session)?;
    state.sessions.insert(session.clone());
    Ok(Json(ApiResponse::ok(AttemptView::of(session))))
}

pub async fn set_wallet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetWalletRequest>,
) -> Result<Json<ApiResponse<WalletView>>, ServiceError> {
    let mut session = load_session(&state, id)?;
    let allocation = state
        .checkout_service
        .set_wallet(&mut session, req.use_wallet, req.amount)
        .await?;
    state.sessions.insert(session);
    Ok(Json(ApiResponse::ok(WalletView {
        payment_button: payment_button_label(&allocation),
        allocation,
    })))
}

pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<ApiResponse<CheckoutOutcome>>, ServiceError> {
    let mut session = load_session(&state, id)?;
    let result = state.checkout_service.submit(&mut session, req.method).await;

    match result {
        Ok(outcome) => {
            // Flow is complete (paid, or handed to the gateway): clear the
            // session deterministically rather than leaving stale state.
            if matches!(
                session.state,
                CheckoutState::Completed | CheckoutState::AwaitingGatewayConfirmation
            ) {
                state.sessions.remove(&id);
            } else {
                state.sessions.insert(session);
            }
            Ok(Json(ApiResponse::ok(outcome)))
        }
        Err(e) => {
            // Keep the session so the user can correct input and retry.
            state.sessions.insert(session);
            Err(e)
        }
    }
}
