use std::collections::HashMap;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    clients::payment_gateway::{CreateIntentRequest, PaymentGateway},
    config::AppConfig,
    entities::{
        cart, cart_discount, cart_item, order, order_item, Cart, CartDiscount, CartItem, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::CartService,
    services::pricing::{self, DiscountTerms, PricingLine, ShippingPolicy},
};

/// Converts selected cart lines into a Pending/Pending order plus a reserved
/// gateway payment intent.
///
/// The gateway call happens before the storage transaction; order persistence
/// and cart shrinking then commit or roll back together. An intent orphaned by
/// a rollback is acceptable collateral since gateways expire unused intents.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    carts: Arc<CartService>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        carts: Arc<CartService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            carts,
            config,
        }
    }

    fn shipping_policy(&self) -> ShippingPolicy {
        ShippingPolicy {
            flat_fee: self.config.flat_shipping_fee(),
            free_threshold: self.config.free_shipping_threshold(),
        }
    }

    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let method = input.payment_method.to_ascii_lowercase();
        if !self
            .config
            .allowed_payment_methods
            .iter()
            .any(|m| m == &method)
        {
            return Err(ServiceError::ValidationError(format!(
                "Invalid payment method: {}",
                input.payment_method
            )));
        }
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "No items selected for checkout".to_string(),
            ));
        }

        // Validate the selection against the cart and the catalog's
        // authoritative prices, then price the selected subset.
        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let cart_lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;
        if cart_lines.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        let by_product: HashMap<Uuid, &cart_item::Model> =
            cart_lines.iter().map(|l| (l.product_id, l)).collect();

        let mut lines = Vec::with_capacity(input.items.len());
        let mut drafts = Vec::with_capacity(input.items.len());
        for selected in &input.items {
            if selected.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "Quantity must be at least 1".to_string(),
                ));
            }

            let cart_line = by_product.get(&selected.product_id).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Product {} not found in cart",
                    selected.product_id
                ))
            })?;

            if selected.quantity > cart_line.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid quantity for {}",
                    cart_line.product_name
                )));
            }

            let product = Product::find_by_id(selected.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", selected.product_id))
                })?;

            if cart_line.unit_price != product.price {
                return Err(ServiceError::PriceChanged(format!(
                    "Price changed for {} - refresh cart",
                    product.name
                )));
            }

            lines.push(PricingLine {
                unit_price: cart_line.unit_price,
                quantity: selected.quantity,
            });
            drafts.push(OrderLineDraft {
                product_id: product.id,
                product_name: product.name,
                sku: product.sku,
                quantity: selected.quantity,
                unit_price: cart_line.unit_price,
            });
        }

        let applied = CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?;
        let terms = applied.as_ref().map(|d| DiscountTerms {
            percentage: d.discount_percentage,
            max_amount: d.max_discount_amount,
        });

        let totals = pricing::compute_totals(&lines, terms.as_ref(), &self.shipping_policy());
        let amount_due = totals.total_due();

        // Reserve the payment intent before opening the transaction; a
        // gateway failure here aborts the checkout with nothing persisted.
        let receipt_id = new_receipt_id();
        let intent = self
            .gateway
            .create_intent(CreateIntentRequest {
                amount_minor: pricing::to_minor_units(amount_due),
                currency: cart.currency.clone(),
                receipt: receipt_id,
                customer_id,
            })
            .await?;

        let discount_snapshot = applied.as_ref().map(|d| OrderDiscountSnapshot {
            rule_id: d.rule_id,
            code: d.code.clone(),
            discount_percentage: d.discount_percentage,
            max_discount_amount: d.max_discount_amount,
            discount_amount: totals.discount_amount,
        });

        let txn = self.db.begin().await?;

        let order_id = Uuid::new_v4();
        let order_number = format!(
            "ORD-{}",
            order_id.to_string()[..8].to_ascii_uppercase()
        );

        let record = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id),
            order_number: Set(order_number.clone()),
            currency: Set(cart.currency.clone()),
            total_amount: Set(amount_due),
            shipping_fee: Set(totals.shipping_fee),
            payment_status: Set(order::PaymentStatus::Pending),
            order_status: Set(order::OrderStatus::Pending),
            payment_method: Set(method),
            gateway_order_id: Set(intent.intent_id.clone()),
            gateway_payment_id: Set(None),
            amount_paid: Set(None),
            shipment_id: Set(None),
            shipping_label_url: Set(None),
            applied_discount: Set(discount_snapshot
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok())),
            shipping_address: Set(serde_json::to_value(&input.shipping_address)
                .map_err(|e| ServiceError::InternalError(format!("address encoding: {}", e)))?),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        record.insert(&txn).await?;

        for draft in &drafts {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(draft.product_id),
                product_name: Set(draft.product_name.clone()),
                sku: Set(draft.sku.clone()),
                quantity: Set(draft.quantity),
                unit_price: Set(draft.unit_price),
                line_total: Set(draft.unit_price * Decimal::from(draft.quantity)),
                created_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        // Shrink the cart, re-verifying each line inside the transaction so a
        // concurrent cart mutation rolls the whole checkout back.
        for selected in &input.items {
            let line = CartItem::find()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .filter(cart_item::Column::ProductId.eq(selected.product_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::Conflict("Cart changed during checkout - retry".to_string())
                })?;

            if line.quantity < selected.quantity {
                return Err(ServiceError::Conflict(
                    "Cart changed during checkout - retry".to_string(),
                ));
            }

            if line.quantity == selected.quantity {
                CartItem::delete_by_id(line.id).exec(&txn).await?;
            } else {
                let remaining = line.quantity - selected.quantity;
                let unit_price = line.unit_price;
                let mut line: cart_item::ActiveModel = line.into();
                line.quantity = Set(remaining);
                line.line_total = Set(unit_price * Decimal::from(remaining));
                line.updated_at = Set(Utc::now());
                line.update(&txn).await?;
            }
        }

        let remaining = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .count(&txn)
            .await?;

        if remaining == 0 {
            CartDiscount::delete_many()
                .filter(cart_discount::Column::CartId.eq(cart.id))
                .exec(&txn)
                .await?;
            Cart::delete_by_id(cart.id).exec(&txn).await?;
        } else {
            self.carts.reprice(&txn, cart.id).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;

        info!(
            "Checkout created order {} ({}) for {} {}",
            order_id, order_number, amount_due, cart.currency
        );

        Ok(CheckoutReceipt {
            order_id,
            order_number,
            gateway_order_id: intent.intent_id,
            amount_due,
            shipping_fee: totals.shipping_fee,
            currency: cart.currency,
        })
    }
}

fn new_receipt_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(14)
        .map(char::from)
        .collect();
    format!("rcpt_{}", suffix)
}

struct OrderLineDraft {
    product_id: Uuid,
    product_name: String,
    sku: String,
    quantity: i32,
    unit_price: Decimal,
}

/// Checkout request payload
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CheckoutInput {
    pub items: Vec<SelectedItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectedItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Delivery address captured on the order as a frozen snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "India".to_string()
}

/// Discount terms frozen onto the order at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDiscountSnapshot {
    pub rule_id: Uuid,
    pub code: String,
    pub discount_percentage: Decimal,
    pub max_discount_amount: Decimal,
    pub discount_amount: Decimal,
}

/// What the caller needs to drive the gateway's payment flow.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub gateway_order_id: String,
    pub amount_due: Decimal,
    pub shipping_fee: Decimal,
    pub currency: String,
}
