use utoipa::OpenApi;

/// OpenAPI document for the storefront API, served at
/// `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "storefront-api",
        description = "Cart pricing, coupon redemption, checkout, payment confirmation and shipment dispatch",
        version = "0.1.0"
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::increment_item,
        crate::handlers::carts::set_item,
        crate::handlers::carts::update_quantity,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::apply_coupon,
        crate::handlers::carts::remove_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::delete_coupon,
        crate::handlers::orders::checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::list_customer_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::delete_order,
        crate::handlers::payments::confirm_payment,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::carts::CartView,
        crate::services::carts::CartLineView,
        crate::services::carts::AppliedDiscountView,
        crate::services::carts::CartItemInput,
        crate::services::checkout::CheckoutInput,
        crate::services::checkout::SelectedItem,
        crate::services::checkout::ShippingAddress,
        crate::services::checkout::CheckoutReceipt,
        crate::services::payments::ConfirmPaymentInput,
        crate::handlers::carts::UpdateQuantityRequest,
        crate::handlers::carts::ApplyCouponRequest,
        crate::handlers::orders::UpdateOrderStatusRequest,
    )),
    tags(
        (name = "Carts", description = "Cart aggregate operations"),
        (name = "Coupons", description = "Discount rule administration"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Payment confirmation"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builds_and_covers_core_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("/api/v1/carts/{customer_id}"));
        assert!(json.contains("/api/v1/orders/checkout/{customer_id}"));
        assert!(json.contains("/api/v1/payments/confirm"));
    }
}
