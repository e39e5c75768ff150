use crate::{
    entities::{order, order_line},
    errors::ServiceError,
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: order::Model,
    pub lines: Vec<order_line::Model>,
}

/// Fetches an order with its lines; the retry entry point and the
/// order-status page both read from here.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let order = state
        .order_service
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {id} not found")))?;
    let lines = state.order_service.get_order_lines(id).await?;
    Ok(Json(ApiResponse::ok(OrderView { order, lines })))
}
