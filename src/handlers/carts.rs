use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input,
};
use crate::{errors::ApiError, services::carts::CartItemInput, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:customer_id", get(get_cart))
        .route("/:customer_id/items", post(increment_item))
        .route("/:customer_id/items", put(set_item))
        .route("/:customer_id/items/:product_id", put(update_quantity))
        .route("/:customer_id/items/:product_id", delete(remove_item))
        .route("/:customer_id/clear", post(clear_cart))
        .route("/:customer_id/coupon", post(apply_coupon))
        .route("/:customer_id/coupon/:code", delete(remove_coupon))
}

/// Get the customer's cart with display data, pruning stale lines
#[utoipa::path(
    get,
    path = "/api/v1/carts/{customer_id}",
    params(("customer_id" = Uuid, Path, description = "Cart owner")),
    responses(
        (status = 200, description = "Cart fetched", body = crate::services::carts::CartView),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let view = state
        .services
        .carts
        .get_cart(customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(view))
}

/// Add to an item's quantity (creates the line when absent)
#[utoipa::path(
    post,
    path = "/api/v1/carts/{customer_id}/items",
    request_body = CartItemInput,
    responses(
        (status = 200, description = "Cart updated"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn increment_item(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<CartItemInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .increment_item(customer_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Set an item's quantity outright (creates the line when absent)
#[utoipa::path(
    put,
    path = "/api/v1/carts/{customer_id}/items",
    request_body = CartItemInput,
    responses(
        (status = 200, description = "Cart updated"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn set_item(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<CartItemInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .set_item(customer_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[derive(Debug, Deserialize, ToSchema, validator::Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Update the quantity of an existing cart line
#[utoipa::path(
    put,
    path = "/api/v1/carts/{customer_id}/items/{product_id}",
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity updated"),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn update_quantity(
    State(state): State<Arc<AppState>>,
    Path((customer_id, product_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .update_quantity(customer_id, product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove a line from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{customer_id}/items/{product_id}",
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((customer_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .carts
        .remove_item(customer_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Empty the cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{customer_id}/clear",
    responses(
        (status = 200, description = "Cart cleared"),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .clear(customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
}

/// Apply a coupon to the cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{customer_id}/coupon",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applied"),
        (status = 400, description = "Coupon rejected", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    if payload.code.trim().is_empty() {
        return Err(ApiError::BadRequest("Coupon code is required".to_string()));
    }

    let cart = state
        .services
        .carts
        .apply_discount(customer_id, &payload.code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove the currently applied coupon
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{customer_id}/coupon/{code}",
    responses(
        (status = 200, description = "Coupon removed"),
        (status = 404, description = "Coupon not applied", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_coupon(
    State(state): State<Arc<AppState>>,
    Path((customer_id, code)): Path<(Uuid, String)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .remove_discount(customer_id, &code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
