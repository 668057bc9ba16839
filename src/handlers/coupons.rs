use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, Paginated,
    PaginationParams,
};
use crate::{
    errors::{ApiError, ServiceError},
    services::discounts::{evaluate_rule, CreateDiscountRuleInput, UpdateDiscountRuleInput},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

/// Creates the router for coupon endpoints
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_coupon))
        .route("/", get(list_coupons))
        .route("/validate", get(validate_coupon))
        .route("/:id", get(get_coupon))
        .route("/:id", put(update_coupon))
        .route("/:id", delete(delete_coupon))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ValidateCouponQuery {
    pub code: String,
    pub cart_total: Decimal,
}

/// Check whether a coupon would apply to a cart of the given gross total.
/// Advisory only; the binding validation reruns when the coupon is applied
/// and again at payment confirmation.
#[utoipa::path(
    get,
    path = "/api/v1/coupons/validate",
    params(ValidateCouponQuery),
    responses(
        (status = 200, description = "Coupon is applicable"),
        (status = 400, description = "Coupon rejected", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateCouponQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let rule = state
        .services
        .discounts
        .find_by_code(&query.code)
        .await
        .map_err(map_service_error)?;

    evaluate_rule(&rule, query.cart_total, Utc::now(), None)
        .map_err(|reason| map_service_error(ServiceError::DiscountRejected(reason.to_string())))?;

    Ok(success_response(serde_json::json!({
        "valid": true,
        "code": rule.code,
        "discount_percentage": rule.discount_percentage,
        "max_discount_amount": rule.max_discount_amount,
    })))
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    responses(
        (status = 201, description = "Coupon created"),
        (status = 400, description = "Invalid coupon definition", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDiscountRuleInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let rule = state
        .services
        .discounts
        .create_rule(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(rule))
}

/// List coupons
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    params(PaginationParams),
    responses((status = 200, description = "Coupons fetched")),
    tag = "Coupons"
)]
pub async fn list_coupons(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (rules, total) = state
        .services
        .discounts
        .list_rules(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(Paginated::new(
        rules,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Get a coupon by id
#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Coupon fetched"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn get_coupon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let rule = state
        .services
        .discounts
        .get_rule(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(rule))
}

/// Update a coupon
#[utoipa::path(
    put,
    path = "/api/v1/coupons/{id}",
    responses(
        (status = 200, description = "Coupon updated"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn update_coupon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDiscountRuleInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let rule = state
        .services
        .discounts
        .update_rule(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(rule))
}

/// Delete a coupon
#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{id}",
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn delete_coupon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .discounts
        .delete_rule(id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
