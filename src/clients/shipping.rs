use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Order snapshot handed to the logistics provider.
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub payment_method: String,
    pub sub_total: Decimal,
    pub items: Vec<ShipmentItem>,
    pub address: ShipmentAddress,
    pub pickup_location: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentItem {
    pub name: String,
    pub sku: String,
    pub units: i32,
    pub selling_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentAddress {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address_line: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Provider-side identifiers for a created shipment.
#[derive(Debug, Clone)]
pub struct ShipmentHandle {
    pub shipment_id: String,
    pub provider_order_id: String,
}

#[derive(Debug, Clone)]
pub struct ShippingLabel {
    pub label_url: String,
}

#[derive(Debug, Clone)]
pub struct TrackingInfo {
    pub status: String,
}

/// External logistics boundary: create, label, track and cancel shipments.
/// Treated as an unreliable remote service with retryable authentication.
#[async_trait]
pub trait ShipmentDispatcher: Send + Sync {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentHandle, ServiceError>;

    async fn generate_label(&self, shipment_id: &str) -> Result<ShippingLabel, ServiceError>;

    async fn track(&self, shipment_id: &str) -> Result<TrackingInfo, ServiceError>;

    async fn cancel(&self, shipment_id: &str) -> Result<(), ServiceError>;
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// HTTP shipment dispatcher with a process-wide bearer-token cache.
///
/// The token is populated on first use, reused until close to expiry and
/// invalidated on a 401. A 401 triggers exactly one re-authentication and
/// retry before the error surfaces.
pub struct HttpShipmentDispatcher {
    client: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    token: RwLock<Option<CachedToken>>,
}

const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_TTL_SECS: i64 = 9 * 24 * 3600;

// Parcel defaults registered with the provider for this storefront's packaging.
const PARCEL_LENGTH_CM: f64 = 15.0;
const PARCEL_BREADTH_CM: f64 = 5.0;
const PARCEL_HEIGHT_CM: f64 = 20.0;
const PARCEL_WEIGHT_KG: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateShipmentResponse {
    shipment_id: i64,
    order_id: i64,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    label_url: String,
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    status: String,
}

impl HttpShipmentDispatcher {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.shipping_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build dispatcher client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.shipping_base_url.trim_end_matches('/').to_string(),
            email: config.shipping_email.clone(),
            password: config.shipping_password.clone(),
            token: RwLock::new(None),
        })
    }

    async fn authenticate(&self) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&serde_json::json!({
                "email": self.email,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!(
                    "shipping provider unreachable during login: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "shipping provider login failed with {}",
                response.status()
            )));
        }

        let login: LoginResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid login response: {}", e))
        })?;

        let ttl = login.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let mut guard = self.token.write().await;
        *guard = Some(CachedToken {
            token: login.token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        });

        Ok(login.token)
    }

    async fn bearer_token(&self) -> Result<String, ServiceError> {
        {
            let guard = self.token.read().await;
            if let Some(cached) = guard.as_ref() {
                let margin = chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS);
                if cached.expires_at > Utc::now() + margin {
                    return Ok(cached.token.clone());
                }
            }
        }
        self.authenticate().await
    }

    async fn invalidate_token(&self) {
        let mut guard = self.token.write().await;
        *guard = None;
    }

    /// Sends an authenticated request, re-authenticating and retrying exactly
    /// once on a 401.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, ServiceError>
    where
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let mut retried = false;
        loop {
            let token = self.bearer_token().await?;
            let response = build(&self.client, &token).send().await.map_err(|e| {
                ServiceError::ExternalServiceError(format!("shipping provider unreachable: {}", e))
            })?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried {
                warn!("Shipping provider rejected token; re-authenticating once");
                self.invalidate_token().await;
                retried = true;
                continue;
            }

            return Ok(response);
        }
    }

    fn shipment_payload(request: &ShipmentRequest) -> serde_json::Value {
        serde_json::json!({
            "order_id": request.order_id.to_string(),
            "order_number": request.order_number,
            "order_date": Utc::now().format("%Y-%m-%d").to_string(),
            "payment_method": request.payment_method,
            "sub_total": request.sub_total,
            "order_items": request.items.iter().map(|item| serde_json::json!({
                "name": item.name,
                "sku": item.sku,
                "units": item.units,
                "selling_price": item.selling_price,
            })).collect::<Vec<_>>(),
            "shipping_is_billing": true,
            "billing_customer_name": request.address.name,
            "billing_phone": request.address.phone,
            "billing_email": request.address.email,
            "billing_address": request.address.address_line,
            "billing_city": request.address.city,
            "billing_state": request.address.state,
            "billing_pincode": request.address.postal_code,
            "billing_country": request.address.country,
            "length": PARCEL_LENGTH_CM,
            "breadth": PARCEL_BREADTH_CM,
            "height": PARCEL_HEIGHT_CM,
            "weight": PARCEL_WEIGHT_KG,
            "pickup_location": request.pickup_location,
        })
    }
}

#[async_trait]
impl ShipmentDispatcher for HttpShipmentDispatcher {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentHandle, ServiceError> {
        let payload = Self::shipment_payload(request);
        let response = self
            .send_authorized(|client, token| {
                client
                    .post(format!("{}/orders/create", self.base_url))
                    .bearer_auth(token)
                    .json(&payload)
            })
            .await?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "shipment creation failed with {}",
                response.status()
            )));
        }

        let created: CreateShipmentResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid shipment response: {}", e))
        })?;

        Ok(ShipmentHandle {
            shipment_id: created.shipment_id.to_string(),
            provider_order_id: created.order_id.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn generate_label(&self, shipment_id: &str) -> Result<ShippingLabel, ServiceError> {
        let response = self
            .send_authorized(|client, token| {
                client
                    .get(format!("{}/courier/label", self.base_url))
                    .query(&[("shipment_id", shipment_id)])
                    .bearer_auth(token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "label generation failed with {}",
                response.status()
            )));
        }

        let label: LabelResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid label response: {}", e))
        })?;

        Ok(ShippingLabel {
            label_url: label.label_url,
        })
    }

    #[instrument(skip(self))]
    async fn track(&self, shipment_id: &str) -> Result<TrackingInfo, ServiceError> {
        let response = self
            .send_authorized(|client, token| {
                client
                    .get(format!("{}/courier/track", self.base_url))
                    .query(&[("shipment_id", shipment_id)])
                    .bearer_auth(token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "tracking lookup failed with {}",
                response.status()
            )));
        }

        let tracked: TrackResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid tracking response: {}", e))
        })?;

        Ok(TrackingInfo {
            status: tracked.status,
        })
    }

    #[instrument(skip(self))]
    async fn cancel(&self, shipment_id: &str) -> Result<(), ServiceError> {
        let response = self
            .send_authorized(|client, token| {
                client
                    .post(format!("{}/orders/cancel", self.base_url))
                    .bearer_auth(token)
                    .json(&serde_json::json!({ "shipment_id": shipment_id }))
            })
            .await?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "shipment cancellation failed with {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher_for(server: &MockServer) -> HttpShipmentDispatcher {
        let mut config = AppConfig::new("sqlite::memory:", "127.0.0.1", 0, "test");
        config.shipping_base_url = server.uri();
        config.shipping_email = "ship@example.com".into();
        config.shipping_password = "hunter2".into();
        HttpShipmentDispatcher::new(&config).unwrap()
    }

    fn sample_request() -> ShipmentRequest {
        ShipmentRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-1A2B3C4D".into(),
            payment_method: "prepaid".into(),
            sub_total: dec!(850),
            items: vec![ShipmentItem {
                name: "Steel Water Bottle".into(),
                sku: "SWB-01".into(),
                units: 2,
                selling_price: dec!(425),
            }],
            address: ShipmentAddress {
                name: "Asha Rao".into(),
                phone: "9999999999".into(),
                email: "asha@example.com".into(),
                address_line: "12 Lake View Road".into(),
                city: "Pune".into(),
                state: "MH".into(),
                postal_code: "411001".into(),
                country: "India".into(),
            },
            pickup_location: "Primary".into(),
        }
    }

    fn login_mock(token: &str) -> Mock {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": token,
                "expires_in": 864000,
            })))
    }

    #[tokio::test]
    async fn token_is_cached_across_calls() {
        let server = MockServer::start().await;
        login_mock("tok-1").expect(1).mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/courier/track"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "In Transit" })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let dispatcher = dispatcher_for(&server);
        let first = dispatcher.track("111").await.unwrap();
        let second = dispatcher.track("111").await.unwrap();
        assert_eq!(first.status, "In Transit");
        assert_eq!(second.status, "In Transit");
    }

    #[tokio::test]
    async fn expired_token_reauthenticates_exactly_once() {
        let server = MockServer::start().await;
        // First login hands out a token the API immediately rejects; the
        // second hands out a good one.
        login_mock("stale").up_to_n_times(1).mount(&server).await;
        login_mock("fresh").mount(&server).await;

        Mock::given(method("POST"))
            .and(path("/orders/create"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/orders/create"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "shipment_id": 4521,
                "order_id": 9917,
            })))
            .mount(&server)
            .await;

        let dispatcher = dispatcher_for(&server);
        let handle = dispatcher.create_shipment(&sample_request()).await.unwrap();
        assert_eq!(handle.shipment_id, "4521");
        assert_eq!(handle.provider_order_id, "9917");
    }

    #[tokio::test]
    async fn persistent_unauthorized_surfaces_after_single_retry() {
        let server = MockServer::start().await;
        login_mock("rejected").mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/orders/cancel"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let dispatcher = dispatcher_for(&server);
        let err = dispatcher.cancel("4521").await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalServiceError(_)));
    }

    #[tokio::test]
    async fn label_url_is_returned() {
        let server = MockServer::start().await;
        login_mock("tok").mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/courier/label"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "label_url": "https://labels.example.com/4521.pdf",
            })))
            .mount(&server)
            .await;

        let dispatcher = dispatcher_for(&server);
        let label = dispatcher.generate_label("4521").await.unwrap();
        assert_eq!(label.label_url, "https://labels.example.com/4521.pdf");
    }
}
