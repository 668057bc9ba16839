use crate::{
    config::AppConfig,
    entities::{
        cart, cart_discount, cart_item, Cart, CartDiscount, CartItem, CartModel, DiscountRule,
        Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::discounts::{canonicalize_code, evaluate_rule, DiscountService},
    services::pricing::{self, DiscountTerms, PricingLine, ShippingPolicy},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Cart aggregate service.
///
/// Each mutation loads the customer's cart, applies the change, reprices the
/// cart through the pricing engine inside the same transaction and persists
/// the result, so stored totals are never stale. One cart per customer,
/// created lazily on the first add.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    discounts: Arc<DiscountService>,
    config: Arc<AppConfig>,
}

/// How an item write treats an existing line.
enum QuantityWrite {
    Replace,
    Add,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        discounts: Arc<DiscountService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            discounts,
            config,
        }
    }

    fn shipping_policy(&self) -> ShippingPolicy {
        ShippingPolicy {
            flat_fee: self.config.flat_shipping_fee(),
            free_threshold: self.config.free_shipping_threshold(),
        }
    }

    /// Sets an item's quantity, replacing any existing line quantity.
    #[instrument(skip(self))]
    pub async fn set_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        let cart = self
            .write_item(customer_id, product_id, quantity, QuantityWrite::Replace)
            .await?;
        self.event_sender
            .send_or_log(Event::CartItemSet {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;
        Ok(cart)
    }

    /// Adds to an item's quantity, creating the line when absent.
    #[instrument(skip(self))]
    pub async fn increment_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        let cart = self
            .write_item(customer_id, product_id, quantity, QuantityWrite::Add)
            .await?;
        self.event_sender
            .send_or_log(Event::CartItemIncremented {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;
        Ok(cart)
    }

    async fn write_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        mode: QuantityWrite,
    ) -> Result<CartModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let cart = self.get_or_create_cart(&txn, customer_id).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let new_quantity = match (&mode, &existing) {
            (QuantityWrite::Add, Some(item)) => item.quantity + quantity,
            _ => quantity,
        };

        if new_quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} units of {} available in stock",
                product.stock, product.name
            )));
        }

        match existing {
            Some(item) => {
                let unit_price = item.unit_price;
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(new_quantity);
                item.line_total = Set(unit_price * Decimal::from(new_quantity));
                item.updated_at = Set(Utc::now());
                item.update(&txn).await?;
            }
            None => {
                // Snapshot price and name at add time; checkout re-validates
                // the price against the catalog.
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    product_name: Set(product.name.clone()),
                    quantity: Set(new_quantity),
                    unit_price: Set(product.price),
                    line_total: Set(product.price * Decimal::from(new_quantity)),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                item.insert(&txn).await?;
            }
        }

        let updated = self.reprice(&txn, cart.id).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Updates the quantity of an existing cart line.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let cart = self.find_cart(&txn, customer_id).await?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found in cart".to_string()))?;

        if quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} units of {} available in stock",
                product.stock, product.name
            )));
        }

        let unit_price = item.unit_price;
        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.line_total = Set(unit_price * Decimal::from(quantity));
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        let updated = self.reprice(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemSet {
                cart_id: updated.id,
                product_id,
                quantity,
            })
            .await;
        Ok(updated)
    }

    /// Removes a line from the cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, customer_id).await?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found in cart".to_string()))?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;

        let updated = self.reprice(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: updated.id,
                product_id,
            })
            .await;
        Ok(updated)
    }

    /// Empties the cart: items gone, coupon gone, totals zeroed.
    #[instrument(skip(self))]
    pub async fn clear(&self, customer_id: Uuid) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, customer_id).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        CartDiscount::delete_many()
            .filter(cart_discount::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let mut active: cart::ActiveModel = cart.into();
        active.gross_total = Set(Decimal::ZERO);
        active.discount_total = Set(Decimal::ZERO);
        active.net_total = Set(Decimal::ZERO);
        active.shipping_fee = Set(Decimal::ZERO);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(updated.id))
            .await;
        info!("Cleared cart for customer {}", customer_id);
        Ok(updated)
    }

    /// Applies a coupon to the cart after running the full validation ladder.
    #[instrument(skip(self))]
    pub async fn apply_discount(
        &self,
        customer_id: Uuid,
        code: &str,
    ) -> Result<CartModel, ServiceError> {
        let rule = self.discounts.find_by_code(code).await?;

        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, customer_id).await?;

        let applied = CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?;

        evaluate_rule(
            &rule,
            cart.gross_total,
            Utc::now(),
            applied.as_ref().map(|d| d.code.as_str()),
        )
        .map_err(|reason| ServiceError::DiscountRejected(reason.to_string()))?;

        let snapshot = cart_discount::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            rule_id: Set(rule.id),
            code: Set(rule.code.clone()),
            discount_percentage: Set(rule.discount_percentage),
            max_discount_amount: Set(rule.max_discount_amount),
            applied_at: Set(Utc::now()),
        };
        snapshot.insert(&txn).await?;

        let updated = self.reprice(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::DiscountApplied {
                cart_id: updated.id,
                rule_id: rule.id,
                code: rule.code.clone(),
            })
            .await;
        info!("Applied coupon {} to cart {}", rule.code, updated.id);
        Ok(updated)
    }

    /// Removes the currently applied coupon; the code must match it.
    #[instrument(skip(self))]
    pub async fn remove_discount(
        &self,
        customer_id: Uuid,
        code: &str,
    ) -> Result<CartModel, ServiceError> {
        let canonical = canonicalize_code(code);
        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, customer_id).await?;

        let applied = CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart.id))
            .filter(cart_discount::Column::Code.eq(canonical.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Coupon {} is not applied to this cart", canonical))
            })?;

        CartDiscount::delete_by_id(applied.id).exec(&txn).await?;

        let updated = self.reprice(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::DiscountRemoved {
                cart_id: updated.id,
                code: canonical,
            })
            .await;
        Ok(updated)
    }

    /// Drops the applied coupon after a successful payment and reprices what
    /// is left. Best-effort cleanup on the post-commit path.
    pub async fn clear_discount_residue(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let Some(cart) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
        else {
            return Ok(());
        };

        CartDiscount::delete_many()
            .filter(cart_discount::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        self.reprice(&txn, cart.id).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Reads the cart, lazily pruning lines whose product has been deleted and
    /// a coupon whose rule has been deleted or gone out of window.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, customer_id).await?;

        let pairs = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(Product)
            .all(&txn)
            .await?;

        let mut pruned = false;
        let mut lines = Vec::with_capacity(pairs.len());
        for (item, product) in pairs {
            match product {
                Some(product) => lines.push((item, product)),
                None => {
                    CartItem::delete_by_id(item.id).exec(&txn).await?;
                    pruned = true;
                }
            }
        }

        let mut applied = CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?;

        if let Some(snapshot) = applied.take() {
            let rule = DiscountRule::find_by_id(snapshot.rule_id).one(&txn).await?;
            if rule.map(|r| r.is_live(Utc::now())).unwrap_or(false) {
                applied = Some(snapshot);
            } else {
                CartDiscount::delete_by_id(snapshot.id).exec(&txn).await?;
                pruned = true;
            }
        }

        let cart = if pruned {
            self.reprice(&txn, cart.id).await?
        } else {
            cart
        };
        txn.commit().await?;

        Ok(CartView {
            id: cart.id,
            customer_id: cart.customer_id,
            currency: cart.currency,
            gross_total: cart.gross_total,
            discount_total: cart.discount_total,
            net_total: cart.net_total,
            shipping_fee: cart.shipping_fee,
            items: lines
                .into_iter()
                .map(|(item, product)| CartLineView {
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                    image_url: product.image_url,
                })
                .collect(),
            applied_discount: applied.map(|d| AppliedDiscountView {
                code: d.code,
                discount_percentage: d.discount_percentage,
                max_discount_amount: d.max_discount_amount,
            }),
        })
    }

    async fn find_cart<C>(&self, conn: &C, customer_id: Uuid) -> Result<CartModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))
    }

    async fn get_or_create_cart<C>(
        &self,
        conn: &C,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok(cart);
        }

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            currency: Set(self.config.currency.clone()),
            gross_total: Set(Decimal::ZERO),
            discount_total: Set(Decimal::ZERO),
            net_total: Set(Decimal::ZERO),
            shipping_fee: Set(Decimal::ZERO),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        let cart = cart.insert(conn).await?;

        self.event_sender
            .send_or_log(Event::CartCreated(cart.id))
            .await;
        Ok(cart)
    }

    /// Recomputes cart totals from its lines and coupon snapshot.
    pub(crate) async fn reprice<C>(&self, conn: &C, cart_id: Uuid) -> Result<CartModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let lines: Vec<PricingLine> = items
            .iter()
            .map(|item| PricingLine {
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();

        let terms = CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart_id))
            .one(conn)
            .await?
            .map(|d| DiscountTerms {
                percentage: d.discount_percentage,
                max_amount: d.max_discount_amount,
            });

        let totals = pricing::compute_totals(&lines, terms.as_ref(), &self.shipping_policy());

        let mut cart: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        cart.gross_total = Set(totals.gross_total);
        cart.discount_total = Set(totals.discount_amount);
        cart.net_total = Set(totals.net_total);
        cart.shipping_fee = Set(totals.shipping_fee);
        cart.updated_at = Set(Utc::now());

        info!(
            "Repriced cart {}: gross={}, discount={}, net={}, shipping={}",
            cart_id,
            totals.gross_total,
            totals.discount_amount,
            totals.net_total,
            totals.shipping_fee
        );

        Ok(cart.update(conn).await?)
    }
}

/// Cart read model with product display data joined in.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub currency: String,
    pub gross_total: Decimal,
    pub discount_total: Decimal,
    pub net_total: Decimal,
    pub shipping_fee: Decimal,
    pub items: Vec<CartLineView>,
    pub applied_discount: Option<AppliedDiscountView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AppliedDiscountView {
    pub code: String,
    pub discount_percentage: Decimal,
    pub max_discount_amount: Decimal,
}

/// Input for item writes
#[derive(Debug, Deserialize, ToSchema, validator::Validate)]
pub struct CartItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}
