use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    clients::{PaymentGateway, ShipmentDispatcher},
    config::AppConfig,
    events::EventSender,
    services::{
        CartService, CheckoutService, DiscountService, NotificationService, OrderService,
        PaymentsService,
    },
};

pub mod carts;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payments;

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub discounts: Arc<DiscountService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentsService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn ShipmentDispatcher>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        let discounts = Arc::new(DiscountService::new(db.clone(), event_sender.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            discounts.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            gateway.clone(),
            carts.clone(),
            config.clone(),
        ));
        let payments = Arc::new(PaymentsService::new(
            db.clone(),
            event_sender.clone(),
            gateway,
            dispatcher.clone(),
            notifications,
            discounts.clone(),
            carts.clone(),
            config,
        ));
        let orders = Arc::new(OrderService::new(db, event_sender, dispatcher));

        Self {
            discounts,
            carts,
            checkout,
            payments,
            orders,
        }
    }
}
