use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
    Paginated, PaginationParams,
};
use crate::{
    entities::order::OrderStatus,
    errors::ApiError,
    services::checkout::CheckoutInput,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for checkout and order endpoints
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/checkout/:customer_id", post(checkout))
        .route("/customer/:customer_id", get(list_customer_orders))
        .route("/:order_id", get(get_order))
        .route("/:order_id", delete(delete_order))
        .route("/:order_id/status", put(update_order_status))
}

/// Convert selected cart lines into a pending order plus a payment intent
#[utoipa::path(
    post,
    path = "/api/v1/orders/checkout/{customer_id}",
    request_body = CheckoutInput,
    responses(
        (status = 201, description = "Order created, awaiting payment confirmation",
         body = crate::services::checkout::CheckoutReceipt),
        (status = 400, description = "Invalid selection or payment method", body = crate::errors::ErrorResponse),
        (status = 409, description = "Price changed - refresh cart", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let receipt = state
        .services
        .checkout
        .create_order(customer_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(receipt))
}

/// Global order listing for administrative review
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses((status = 200, description = "Orders fetched")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .orders
        .list_all(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(Paginated::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Order history for one customer
#[utoipa::path(
    get,
    path = "/api/v1/orders/customer/{customer_id}",
    params(PaginationParams, ("customer_id" = Uuid, Path, description = "Order owner")),
    responses((status = 200, description = "Orders fetched")),
    tag = "Orders"
)]
pub async fn list_customer_orders(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .orders
        .list_for_customer(customer_id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(Paginated::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Get one order with its line items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order fetched"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let detail = state
        .services
        .orders
        .get_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(detail))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub order_status: String,
}

#[derive(Debug, Serialize)]
struct OrderStatusResponse<T: Serialize> {
    order: T,
    tracking_status: Option<String>,
}

/// Administrative order status transition
#[utoipa::path(
    put,
    path = "/api/v1/orders/{order_id}/status",
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Invalid order status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let status = OrderStatus::from_str(&payload.order_status)
        .map_err(|_| ApiError::BadRequest("Invalid order status".to_string()))?;

    let (order, tracking) = state
        .services
        .orders
        .update_status(order_id, status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(OrderStatusResponse {
        order,
        tracking_status: tracking.map(|t| t.status),
    }))
}

/// Administrative cancel: best-effort shipment cancel, then delete
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{order_id}",
    responses(
        (status = 204, description = "Order deleted"),
        (status = 400, description = "Delivered orders cannot be deleted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .orders
        .delete_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
