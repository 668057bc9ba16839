use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    clients::payment_gateway::PaymentGateway,
    clients::shipping::{ShipmentAddress, ShipmentDispatcher, ShipmentItem, ShipmentRequest},
    config::AppConfig,
    entities::{order, order_item, Order, OrderItem, OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::CartService,
    services::checkout::{OrderDiscountSnapshot, ShippingAddress},
    services::discounts::DiscountService,
    services::notifications::NotificationService,
};
use chrono::Utc;

type HmacSha256 = Hmac<Sha256>;

/// Recomputes the HMAC-SHA256 over `gateway_order_id|gateway_payment_id` and
/// compares it to the supplied signature in constant time.
pub fn verify_signature(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> bool {
    let payload = format!("{}|{}", gateway_order_id, gateway_payment_id);
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

/// Computes the expected confirmation signature; exposed for test harnesses
/// that emulate the gateway.
pub fn sign_confirmation(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let payload = format!("{}|{}", gateway_order_id, gateway_payment_id);
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Client-reported payment completion signal.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentInput {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

/// Finalizes gateway-confirmed payments.
///
/// The payment-state mutation is transactional; shipment creation and
/// notifications run post-commit and are compensated by an admin alert
/// rather than a rollback, because the payment is already captured.
#[derive(Clone)]
pub struct PaymentsService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<dyn ShipmentDispatcher>,
    notifications: Arc<NotificationService>,
    discounts: Arc<DiscountService>,
    carts: Arc<CartService>,
    config: Arc<AppConfig>,
}

impl PaymentsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn ShipmentDispatcher>,
        notifications: Arc<NotificationService>,
        discounts: Arc<DiscountService>,
        carts: Arc<CartService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            dispatcher,
            notifications,
            discounts,
            carts,
            config,
        }
    }

    /// Verifies and finalizes a payment confirmation.
    ///
    /// Steps 1-2 never mutate state. Step 3 (discount usage + Paid marker) is
    /// one transaction; losing the last coupon slot to a concurrent
    /// confirmation aborts it entirely, leaving a captured-but-unfinalized
    /// payment that is escalated for manual resolution. Post-commit work is
    /// best-effort.
    #[instrument(skip(self, input), fields(gateway_order_id = %input.gateway_order_id))]
    pub async fn confirm(&self, input: ConfirmPaymentInput) -> Result<OrderModel, ServiceError> {
        if !verify_signature(
            &self.config.gateway_key_secret,
            &input.gateway_order_id,
            &input.gateway_payment_id,
            &input.signature,
        ) {
            return Err(ServiceError::InvalidSignature);
        }

        if self.config.gateway_verify_capture {
            let snapshot = self.gateway.fetch_payment(&input.gateway_payment_id).await?;
            if !snapshot.is_captured() {
                return Err(ServiceError::PaymentFailed(format!(
                    "payment {} is not captured ({})",
                    input.gateway_payment_id, snapshot.status
                )));
            }
        }

        let txn = self.db.begin().await?;

        let existing = Order::find()
            .filter(order::Column::GatewayOrderId.eq(input.gateway_order_id.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order for gateway order {}",
                    input.gateway_order_id
                ))
            })?;

        if existing.payment_status != order::PaymentStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been processed",
                existing.order_number
            )));
        }

        let discount_snapshot: Option<OrderDiscountSnapshot> = existing
            .applied_discount
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok());

        let mut exhausted_rule = None;
        if let Some(snapshot) = &discount_snapshot {
            match self.discounts.increment_usage(&txn, snapshot.rule_id).await {
                Ok(outcome) => {
                    if outcome.exhausted {
                        exhausted_rule = Some(snapshot.rule_id);
                    }
                }
                Err(err @ ServiceError::UsageLimitReached(_)) => {
                    // Payment is verified but the order cannot be finalized;
                    // roll everything back and escalate the captured payment.
                    drop(txn);
                    warn!(
                        "Coupon {} lost its last slot during confirmation of {}",
                        snapshot.code, existing.order_number
                    );
                    self.notifications.admin_alert(
                        &format!(
                            "Captured payment rejected for order {}",
                            existing.order_number
                        ),
                        &format!(
                            "Payment {} was verified but coupon {} exceeded its usage limit. \
                             Refund or override required.",
                            input.gateway_payment_id, snapshot.code
                        ),
                    );
                    return Err(err);
                }
                Err(other) => return Err(other),
            }
        }

        let total = existing.total_amount;
        let customer_id = existing.customer_id;

        let mut active: order::ActiveModel = existing.into();
        active.payment_status = Set(order::PaymentStatus::Paid);
        active.order_status = Set(order::OrderStatus::Processing);
        active.gateway_payment_id = Set(Some(input.gateway_payment_id.clone()));
        active.amount_paid = Set(Some(total));
        active.updated_at = Set(Utc::now());
        let paid_order = active.update(&txn).await?;

        txn.commit().await?;

        if let Some(rule_id) = exhausted_rule {
            self.event_sender
                .send_or_log(Event::DiscountRuleExhausted(rule_id))
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id: paid_order.id,
                amount: total,
            })
            .await;
        info!(
            "Order {} marked paid ({} {})",
            paid_order.order_number, total, paid_order.currency
        );

        // Post-commit residue cleanup and notifications; failures are logged,
        // never propagated.
        if let Err(err) = self.carts.clear_discount_residue(customer_id).await {
            warn!(
                "Failed to clear cart residue for customer {}: {}",
                customer_id, err
            );
        }

        let address: ShippingAddress =
            serde_json::from_value(paid_order.shipping_address.clone()).unwrap_or_default();

        self.notifications.order_confirmation(
            &address.email,
            &paid_order.order_number,
            paid_order.total_amount,
            &paid_order.currency,
        );

        Ok(self.dispatch_shipment(paid_order, &address).await)
    }

    /// Attempts shipment creation for a freshly paid order.
    ///
    /// Success moves the order to Shipped with the provider identifiers
    /// recorded; failure leaves it Paid/Processing and raises an admin alert.
    async fn dispatch_shipment(&self, order: OrderModel, address: &ShippingAddress) -> OrderModel {
        let items = match OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                error!(
                    "Could not load items for shipment of {}: {}",
                    order.order_number, err
                );
                self.escalate_shipment_failure(&order, &err.to_string()).await;
                return order;
            }
        };

        let request = ShipmentRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            payment_method: "prepaid".to_string(),
            sub_total: order.total_amount - order.shipping_fee,
            items: items
                .iter()
                .map(|item| ShipmentItem {
                    name: item.product_name.clone(),
                    sku: item.sku.clone(),
                    units: item.quantity,
                    selling_price: item.unit_price,
                })
                .collect(),
            address: ShipmentAddress {
                name: address.name.clone(),
                phone: address.phone.clone(),
                email: address.email.clone(),
                address_line: address.address_line1.clone(),
                city: address.city.clone(),
                state: address.state.clone(),
                postal_code: address.postal_code.clone(),
                country: address.country.clone(),
            },
            pickup_location: self.config.shipping_pickup_location.clone(),
        };

        let dispatch = async {
            let handle = self.dispatcher.create_shipment(&request).await?;
            let label = self.dispatcher.generate_label(&handle.shipment_id).await?;
            Ok::<_, ServiceError>((handle, label))
        };

        match dispatch.await {
            Ok((handle, label)) => {
                let order_id = order.id;
                let order_number = order.order_number.clone();
                let mut active: order::ActiveModel = order.clone().into();
                active.shipment_id = Set(Some(handle.shipment_id.clone()));
                active.shipping_label_url = Set(Some(label.label_url));
                active.order_status = Set(order::OrderStatus::Shipped);
                active.updated_at = Set(Utc::now());

                match active.update(&*self.db).await {
                    Ok(updated) => {
                        self.event_sender
                            .send_or_log(Event::ShipmentCreated {
                                order_id,
                                shipment_id: handle.shipment_id.clone(),
                            })
                            .await;
                        self.notifications.order_shipped(
                            &address.email,
                            &order_number,
                            &handle.shipment_id,
                        );
                        info!(
                            "Order {} shipped via shipment {}",
                            order_number, handle.shipment_id
                        );
                        updated
                    }
                    Err(err) => {
                        error!(
                            "Shipment {} created but order {} update failed: {}",
                            handle.shipment_id, order_number, err
                        );
                        self.escalate_shipment_failure(&order, &err.to_string()).await;
                        order
                    }
                }
            }
            Err(err) => {
                warn!(
                    "Shipment dispatch failed for {}: {}",
                    order.order_number, err
                );
                self.escalate_shipment_failure(&order, &err.to_string()).await;
                order
            }
        }
    }

    async fn escalate_shipment_failure(&self, order: &OrderModel, detail: &str) {
        self.event_sender
            .send_or_log(Event::ShipmentFailed {
                order_id: order.id,
                reason: detail.to_string(),
            })
            .await;
        self.notifications.admin_alert(
            &format!("Shipment dispatch failed for order {}", order.order_number),
            &format!(
                "Order {} is paid but could not be handed to the shipping provider: {}",
                order.order_number, detail
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "storefront_gateway_secret";

    #[test]
    fn signature_round_trip_verifies() {
        let sig = sign_confirmation(SECRET, "order_abc", "pay_xyz");
        assert!(verify_signature(SECRET, "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let mut sig = sign_confirmation(SECRET, "order_abc", "pay_xyz");
        // Flip the last hex digit
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });
        assert!(!verify_signature(SECRET, "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn signature_binds_both_identifiers() {
        let sig = sign_confirmation(SECRET, "order_abc", "pay_xyz");
        assert!(!verify_signature(SECRET, "order_other", "pay_xyz", &sig));
        assert!(!verify_signature(SECRET, "order_abc", "pay_other", &sig));
        assert!(!verify_signature("wrong_secret", "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn constant_time_eq_requires_equal_lengths() {
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
    }
}
