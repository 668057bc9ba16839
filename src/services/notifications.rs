use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A queued outbound notification. Delivery is fire-and-forget: jobs are
/// enqueued from request paths and drained by a background worker, so mail
/// transport latency and failures never reach checkout callers.
#[derive(Debug, Clone, Serialize)]
pub enum NotificationJob {
    OrderConfirmation {
        to: String,
        order_number: String,
        total_amount: Decimal,
        currency: String,
    },
    OrderShipped {
        to: String,
        order_number: String,
        shipment_id: String,
    },
    AdminAlert {
        to: String,
        subject: String,
        detail: String,
    },
}

#[derive(Clone)]
pub struct NotificationService {
    tx: mpsc::Sender<NotificationJob>,
    admin_address: String,
}

impl NotificationService {
    /// Starts the delivery worker and returns the enqueue handle.
    ///
    /// With no relay configured, jobs are logged and dropped; useful for
    /// development and tests.
    pub fn start(
        relay_url: Option<String>,
        admin_address: String,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let worker = tokio::spawn(deliver_jobs(rx, relay_url));
        (
            Self {
                tx,
                admin_address,
            },
            worker,
        )
    }

    /// Builds a service backed by a caller-owned queue with no delivery
    /// worker; the caller drains the receiver. Used by embedding harnesses.
    pub fn with_queue(
        admin_address: String,
    ) -> (Self, mpsc::Receiver<NotificationJob>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                tx,
                admin_address,
            },
            rx,
        )
    }

    /// Enqueues without blocking; a full or closed queue is logged, never
    /// surfaced.
    pub fn enqueue(&self, job: NotificationJob) {
        if let Err(err) = self.tx.try_send(job) {
            warn!("Dropping notification job: {}", err);
        }
    }

    pub fn order_confirmation(
        &self,
        to: &str,
        order_number: &str,
        total_amount: Decimal,
        currency: &str,
    ) {
        self.enqueue(NotificationJob::OrderConfirmation {
            to: to.to_string(),
            order_number: order_number.to_string(),
            total_amount,
            currency: currency.to_string(),
        });
    }

    pub fn order_shipped(&self, to: &str, order_number: &str, shipment_id: &str) {
        self.enqueue(NotificationJob::OrderShipped {
            to: to.to_string(),
            order_number: order_number.to_string(),
            shipment_id: shipment_id.to_string(),
        });
    }

    /// Operational escalation to the configured admin address.
    pub fn admin_alert(&self, subject: &str, detail: &str) {
        self.enqueue(NotificationJob::AdminAlert {
            to: self.admin_address.clone(),
            subject: subject.to_string(),
            detail: detail.to_string(),
        });
    }
}

/// Rendered message ready for the relay.
#[derive(Debug, Serialize, PartialEq)]
pub struct RenderedMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn render(job: &NotificationJob) -> RenderedMessage {
    match job {
        NotificationJob::OrderConfirmation {
            to,
            order_number,
            total_amount,
            currency,
        } => RenderedMessage {
            to: to.clone(),
            subject: format!("Order Confirmation {}", order_number),
            text: format!(
                "Thank you for your order {}.\nTotal: {} {}\nWe'll notify you when your items ship.",
                order_number, total_amount, currency
            ),
            html: format!(
                "<h2>Order Confirmation</h2><p>Thank you for your order <strong>{}</strong>.</p>\
                 <p>Total: {} {}</p><p>We'll notify you when your items ship!</p>",
                order_number, total_amount, currency
            ),
        },
        NotificationJob::OrderShipped {
            to,
            order_number,
            shipment_id,
        } => RenderedMessage {
            to: to.clone(),
            subject: format!("Your order {} has shipped", order_number),
            text: format!(
                "Your order {} is on the way.\nTracking ID: {}",
                order_number, shipment_id
            ),
            html: format!(
                "<h2>Your Order Has Shipped!</h2><p>Order <strong>{}</strong> is on the way.</p>\
                 <p>Tracking ID: {}</p>",
                order_number, shipment_id
            ),
        },
        NotificationJob::AdminAlert {
            to,
            subject,
            detail,
        } => RenderedMessage {
            to: to.clone(),
            subject: format!("[ALERT] {}", subject),
            text: detail.clone(),
            html: format!("<h2>{}</h2><pre>{}</pre>", subject, detail),
        },
    }
}

async fn deliver_jobs(mut rx: mpsc::Receiver<NotificationJob>, relay_url: Option<String>) {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .ok();

    while let Some(job) = rx.recv().await {
        let message = render(&job);
        match (&relay_url, &client) {
            (Some(url), Some(client)) => {
                let result = client.post(url.as_str()).json(&message).send().await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        info!("Delivered notification to {}", message.to);
                    }
                    Ok(response) => {
                        warn!(
                            "Notification relay returned {} for {}",
                            response.status(),
                            message.to
                        );
                    }
                    Err(err) => {
                        warn!("Notification delivery failed for {}: {}", message.to, err);
                    }
                }
            }
            _ => {
                info!(
                    "Notification relay not configured; dropping '{}' for {}",
                    message.subject, message.to
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn confirmation_rendering_includes_order_and_total() {
        let job = NotificationJob::OrderConfirmation {
            to: "asha@example.com".into(),
            order_number: "ORD-1A2B3C4D".into(),
            total_amount: dec!(850.00),
            currency: "INR".into(),
        };
        let message = render(&job);
        assert_eq!(message.to, "asha@example.com");
        assert!(message.subject.contains("ORD-1A2B3C4D"));
        assert!(message.text.contains("850.00 INR"));
    }

    #[test]
    fn admin_alert_is_flagged_in_subject() {
        let job = NotificationJob::AdminAlert {
            to: "ops@example.com".into(),
            subject: "Shipment dispatch failed for ORD-1".into(),
            detail: "label generation failed with 502".into(),
        };
        let message = render(&job);
        assert!(message.subject.starts_with("[ALERT]"));
        assert!(message.text.contains("502"));
    }

    #[tokio::test]
    async fn enqueue_never_blocks_after_worker_stops() {
        let (service, worker) = NotificationService::start(None, "ops@example.com".into());
        worker.abort();
        // try_send either queues or logs; it must not panic or block
        for _ in 0..16 {
            service.admin_alert("noop", "noop");
        }
    }
}
