use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Request to reserve a payment intent with the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct CreateIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
    pub customer_id: Uuid,
}

/// Gateway-side handle for a reserved payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
}

/// Gateway-reported state of a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSnapshot {
    pub payment_id: String,
    pub status: String,
    pub amount_minor: i64,
}

impl PaymentSnapshot {
    pub fn is_captured(&self) -> bool {
        self.status == "captured"
    }
}

/// Payment gateway boundary. Checkout and confirmation depend on this trait,
/// never on the concrete HTTP client.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Reserves an intent for the given minor-unit amount, tagged with a
    /// receipt id and the owning customer.
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;

    /// Fetches the gateway's view of a payment.
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentSnapshot, ServiceError>;
}

/// HTTP payment gateway client with key/secret auth and bounded timeouts.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayPaymentResponse {
    id: String,
    status: String,
    amount: i64,
}

impl HttpPaymentGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.gateway_base_url.trim_end_matches('/').to_string(),
            key_id: config.gateway_key_id.clone(),
            key_secret: config.gateway_key_secret.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let payload = serde_json::json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "receipt": request.receipt,
            "notes": { "customer_id": request.customer_id.to_string() },
        });

        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway returned {} creating intent",
                response.status()
            )));
        }

        let order: GatewayOrderResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid gateway response: {}", e))
        })?;

        Ok(PaymentIntent {
            intent_id: order.id,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentSnapshot, ServiceError> {
        let response = self
            .client
            .get(format!("{}/payments/{}", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway returned {} fetching payment",
                response.status()
            )));
        }

        let payment: GatewayPaymentResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid gateway response: {}", e))
        })?;

        Ok(PaymentSnapshot {
            payment_id: payment.id,
            status: payment.status,
            amount_minor: payment.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> HttpPaymentGateway {
        let mut config = AppConfig::new("sqlite::memory:", "127.0.0.1", 0, "test");
        config.gateway_base_url = server.uri();
        config.gateway_key_id = "key".into();
        config.gateway_key_secret = "secret".into();
        HttpPaymentGateway::new(&config).unwrap()
    }

    #[tokio::test]
    async fn create_intent_returns_gateway_order_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "order_9A33XWu170gUtm",
                "amount": 85000,
                "currency": "INR",
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let intent = gateway
            .create_intent(CreateIntentRequest {
                amount_minor: 85000,
                currency: "INR".into(),
                receipt: "rcpt_abc".into(),
                customer_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        assert_eq!(intent.intent_id, "order_9A33XWu170gUtm");
    }

    #[tokio::test]
    async fn gateway_error_status_maps_to_external_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let err = gateway
            .create_intent(CreateIntentRequest {
                amount_minor: 100,
                currency: "INR".into(),
                receipt: "rcpt_x".into(),
                customer_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::ExternalServiceError(_)));
    }

    #[tokio::test]
    async fn fetch_payment_reports_captured_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pay_123",
                "status": "captured",
                "amount": 55500,
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let snapshot = gateway.fetch_payment("pay_123").await.unwrap();
        assert!(snapshot.is_captured());
        assert_eq!(snapshot.amount_minor, 55500);
    }
}
