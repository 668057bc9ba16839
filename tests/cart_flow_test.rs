mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::{entities::Product, errors::ServiceError};
use uuid::Uuid;

#[tokio::test]
async fn set_replaces_quantity_while_increment_adds() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Steel Water Bottle", dec!(500), 10).await;

    let carts = &app.state.services.carts;

    let cart = carts.set_item(customer, product, 2).await.unwrap();
    assert_eq!(cart.gross_total, dec!(1000));

    // set again: replaces
    let cart = carts.set_item(customer, product, 3).await.unwrap();
    assert_eq!(cart.gross_total, dec!(1500));

    // increment: adds on top
    let cart = carts.increment_item(customer, product, 2).await.unwrap();
    assert_eq!(cart.gross_total, dec!(2500));
}

#[tokio::test]
async fn add_then_remove_restores_an_empty_cart() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Copper Mug", dec!(100), 10).await;

    let carts = &app.state.services.carts;
    let cart = carts.increment_item(customer, product, 2).await.unwrap();
    assert_eq!(cart.gross_total, dec!(200));

    let cart = carts.remove_item(customer, product).await.unwrap();
    assert_eq!(cart.gross_total, Decimal::ZERO);
    assert_eq!(cart.net_total, Decimal::ZERO);
    assert_eq!(cart.shipping_fee, Decimal::ZERO);

    let view = carts.get_cart(customer).await.unwrap();
    assert!(view.items.is_empty());
    assert!(view.applied_discount.is_none());
}

#[tokio::test]
async fn capped_coupon_prices_to_eight_fifty_with_free_shipping() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Steel Water Bottle", dec!(500), 10).await;
    app.seed_rule("FEST20", dec!(20), dec!(150), Decimal::ZERO, 10)
        .await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, product, 2).await.unwrap();

    let cart = carts.apply_discount(customer, "fest20").await.unwrap();
    assert_eq!(cart.gross_total, dec!(1000));
    assert_eq!(cart.discount_total, dec!(150));
    assert_eq!(cart.net_total, dec!(850));
    assert_eq!(cart.shipping_fee, Decimal::ZERO);
}

#[tokio::test]
async fn deep_coupon_drops_below_threshold_and_adds_flat_fee() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Steel Water Bottle", dec!(500), 10).await;
    app.seed_rule("HALF", dec!(50), dec!(1000), Decimal::ZERO, 10)
        .await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, product, 2).await.unwrap();

    let cart = carts.apply_discount(customer, "HALF").await.unwrap();
    assert_eq!(cart.discount_total, dec!(500));
    assert_eq!(cart.net_total, dec!(500));
    assert_eq!(cart.shipping_fee, dec!(55));
}

#[tokio::test]
async fn stock_limits_are_enforced_on_every_write() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Limited Run Print", dec!(900), 3).await;

    let carts = &app.state.services.carts;

    assert_matches!(
        carts.set_item(customer, product, 4).await,
        Err(ServiceError::InsufficientStock(_))
    );

    carts.increment_item(customer, product, 2).await.unwrap();
    // 2 + 2 exceeds stock of 3
    assert_matches!(
        carts.increment_item(customer, product, 2).await,
        Err(ServiceError::InsufficientStock(_))
    );
    assert_matches!(
        carts.update_quantity(customer, product, 5).await,
        Err(ServiceError::InsufficientStock(_))
    );
}

#[tokio::test]
async fn unknown_products_and_missing_carts_are_not_found() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let carts = &app.state.services.carts;

    assert_matches!(
        carts.set_item(customer, Uuid::new_v4(), 1).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(carts.get_cart(customer).await, Err(ServiceError::NotFound(_)));
    assert_matches!(
        carts.remove_item(customer, Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn second_coupon_is_rejected_while_one_is_active() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Steel Water Bottle", dec!(500), 10).await;
    app.seed_rule("FEST20", dec!(20), dec!(150), Decimal::ZERO, 10)
        .await;
    app.seed_rule("HALF", dec!(50), dec!(1000), Decimal::ZERO, 10)
        .await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, product, 2).await.unwrap();
    carts.apply_discount(customer, "FEST20").await.unwrap();

    assert_matches!(
        carts.apply_discount(customer, "HALF").await,
        Err(ServiceError::DiscountRejected(_))
    );
    assert_matches!(
        carts.apply_discount(customer, "FEST20").await,
        Err(ServiceError::DiscountRejected(_))
    );

    // removing the active coupon clears the way
    carts.remove_discount(customer, "FEST20").await.unwrap();
    let cart = carts.apply_discount(customer, "HALF").await.unwrap();
    assert_eq!(cart.discount_total, dec!(500));
}

#[tokio::test]
async fn coupon_below_minimum_cart_value_is_rejected() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Sticker Pack", dec!(50), 10).await;
    app.seed_rule("BIGSPEND", dec!(10), dec!(500), dec!(1000), 10)
        .await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, product, 2).await.unwrap();

    assert_matches!(
        carts.apply_discount(customer, "BIGSPEND").await,
        Err(ServiceError::DiscountRejected(_))
    );
}

#[tokio::test]
async fn removing_an_unapplied_coupon_is_not_found() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Copper Mug", dec!(100), 10).await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, product, 1).await.unwrap();

    assert_matches!(
        carts.remove_discount(customer, "GHOST").await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn stale_lines_are_pruned_lazily_on_read() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let kept = app.seed_product("Copper Mug", dec!(100), 10).await;
    let doomed = app.seed_product("Discontinued Lamp", dec!(900), 10).await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, kept, 1).await.unwrap();
    carts.increment_item(customer, doomed, 1).await.unwrap();

    // the product disappears from the catalog after it was carted
    Product::delete_by_id(doomed)
        .exec(&*app.state.db)
        .await
        .unwrap();

    let view = carts.get_cart(customer).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].product_id, kept);
    assert_eq!(view.gross_total, dec!(100));
}

#[tokio::test]
async fn clear_empties_items_coupon_and_totals() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product("Steel Water Bottle", dec!(500), 10).await;
    app.seed_rule("FEST20", dec!(20), dec!(150), Decimal::ZERO, 10)
        .await;

    let carts = &app.state.services.carts;
    carts.increment_item(customer, product, 2).await.unwrap();
    carts.apply_discount(customer, "FEST20").await.unwrap();

    let cart = carts.clear(customer).await.unwrap();
    assert_eq!(cart.gross_total, Decimal::ZERO);
    assert_eq!(cart.net_total, Decimal::ZERO);

    let view = carts.get_cart(customer).await.unwrap();
    assert!(view.items.is_empty());
    assert!(view.applied_discount.is_none());
}
