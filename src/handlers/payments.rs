use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, services::payments::ConfirmPaymentInput, AppState};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use std::sync::Arc;

/// Creates the router for payment endpoints
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/confirm", post(confirm_payment))
}

/// Verify a gateway payment signal and finalize the order
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmPaymentInput,
    responses(
        (status = 200, description = "Payment confirmed; order paid and handed to shipping"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "No order for gateway order id", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already processed or coupon slot lost", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmPaymentInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .payments
        .confirm(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
