#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use storefront_api::{
    clients::payment_gateway::{CreateIntentRequest, PaymentGateway, PaymentIntent, PaymentSnapshot},
    clients::shipping::{
        ShipmentDispatcher, ShipmentHandle, ShipmentRequest, ShippingLabel, TrackingInfo,
    },
    config::AppConfig,
    db,
    entities::{discount_rule, product},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    services::notifications::{NotificationJob, NotificationService},
    AppState,
};

/// Gateway stub: deterministic intent ids, always-captured payments.
pub struct StubGateway {
    pub intents_created: AtomicUsize,
    pub fail_create: AtomicBool,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            intents_created: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "gateway down".to_string(),
            ));
        }
        let n = self.intents_created.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent {
            intent_id: format!("order_test_{}_{}", n, request.receipt),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentSnapshot, ServiceError> {
        Ok(PaymentSnapshot {
            payment_id: payment_id.to_string(),
            status: "captured".to_string(),
            amount_minor: 0,
        })
    }
}

/// Dispatcher stub with a failure toggle and call recording.
pub struct StubDispatcher {
    pub fail_create: AtomicBool,
    pub created: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl StubDispatcher {
    pub fn new() -> Self {
        Self {
            fail_create: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ShipmentDispatcher for StubDispatcher {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentHandle, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "shipping provider down".to_string(),
            ));
        }
        let shipment_id = format!("ship_{}", request.order_number);
        self.created.lock().await.push(shipment_id.clone());
        Ok(ShipmentHandle {
            shipment_id,
            provider_order_id: "prov_1".to_string(),
        })
    }

    async fn generate_label(&self, shipment_id: &str) -> Result<ShippingLabel, ServiceError> {
        Ok(ShippingLabel {
            label_url: format!("https://labels.test/{}.pdf", shipment_id),
        })
    }

    async fn track(&self, _shipment_id: &str) -> Result<TrackingInfo, ServiceError> {
        Ok(TrackingInfo {
            status: "In Transit".to_string(),
        })
    }

    async fn cancel(&self, shipment_id: &str) -> Result<(), ServiceError> {
        self.cancelled.lock().await.push(shipment_id.to_string());
        Ok(())
    }
}

/// Application harness over a fresh SQLite database.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub gateway: Arc<StubGateway>,
    pub dispatcher: Arc<StubDispatcher>,
    pub notifications: mpsc::Receiver<NotificationJob>,
    pub events: mpsc::Receiver<Event>,
    _tempdir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let tempdir = tempfile::TempDir::new().expect("tempdir");
        let db_path = tempdir.path().join("storefront_test.db");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1",
            0,
            "test",
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway_key_secret = "test_gateway_secret".to_string();

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool).await.expect("schema bootstrap");

        let db = Arc::new(pool);
        let (event_tx, events) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);

        let (notification_service, notifications) =
            NotificationService::with_queue("ops@test.local".to_string());

        let config = Arc::new(cfg);
        let gateway = Arc::new(StubGateway::new());
        let dispatcher = Arc::new(StubDispatcher::new());

        let services = AppServices::new(
            db.clone(),
            Arc::new(event_sender.clone()),
            config.clone(),
            gateway.clone(),
            dispatcher.clone(),
            Arc::new(notification_service),
        );

        let state = Arc::new(AppState {
            db,
            config,
            event_sender,
            services,
        });

        Self {
            state,
            gateway,
            dispatcher,
            notifications,
            events,
            _tempdir: tempdir,
        }
    }

    pub fn gateway_secret(&self) -> &str {
        &self.state.config.gateway_key_secret
    }

    /// Inserts a catalog product and returns its id.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        let model = product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            sku: Set(format!("SKU-{}", &id.to_string()[..8])),
            price: Set(price),
            stock: Set(stock),
            image_url: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        model.insert(&*self.state.db).await.expect("seed product");
        id
    }

    /// Inserts a live discount rule and returns its id.
    pub async fn seed_rule(
        &self,
        code: &str,
        percentage: Decimal,
        cap: Decimal,
        min_cart_value: Decimal,
        usage_limit: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let model = discount_rule::ActiveModel {
            id: Set(id),
            code: Set(code.to_string()),
            discount_percentage: Set(percentage),
            max_discount_amount: Set(cap),
            min_cart_value: Set(min_cart_value),
            valid_from: Set(now - Duration::days(1)),
            valid_until: Set(now + Duration::days(30)),
            usage_limit: Set(usage_limit),
            usage_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        model.insert(&*self.state.db).await.expect("seed rule");
        id
    }

    /// Drains any pending notification jobs without waiting.
    pub fn drain_notifications(&mut self) -> Vec<NotificationJob> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.notifications.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}
