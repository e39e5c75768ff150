//! Fire-and-forget notification to the out-of-band payment verification
//! worker.
//!
//! This is a one-way signal, not a reliability mechanism: checkout
//! correctness never depends on delivery, the caller is never blocked, and
//! failures are logged only. The spawned task survives the request context
//! that issued it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;

/// Body posted to the verification worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPayload {
    pub transaction_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// HMAC-SHA256 signer for notification payloads.
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn sign_payload(&self, timestamp: &str, body: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let signed_payload = format!("{timestamp}.{body}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[derive(Clone)]
pub struct VerificationNotifier {
    client: reqwest::Client,
    worker_url: Option<String>,
    signature_generator: Option<Arc<SignatureGenerator>>,
}

impl VerificationNotifier {
    pub fn new(worker_url: Option<String>, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            worker_url,
            signature_generator: secret.map(|s| Arc::new(SignatureGenerator::new(s))),
        }
    }

    /// Notifier that never sends anything; for tests and disabled deploys.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Signals the verification worker about a gateway-bound payment.
    /// Returns immediately; delivery happens on a detached task with bounded
    /// retries, and never surfaces an error to the caller.
    pub fn notify(&self, transaction_id: Uuid, order_id: Uuid, amount: Decimal) {
        let Some(url) = self.worker_url.clone() else {
            debug!(
                transaction_id = %transaction_id,
                "verification worker not configured; skipping notification"
            );
            return;
        };

        let payload = VerificationPayload {
            transaction_id,
            order_id,
            amount,
            timestamp: Utc::now(),
        };
        let client = self.client.clone();
        let signer = self.signature_generator.clone();

        tokio::spawn(async move {
            let body = match serde_json::to_string(&payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to serialize verification payload");
                    return;
                }
            };
            let timestamp = payload.timestamp.to_rfc3339();
            let signature = signer.as_ref().map(|s| s.sign_payload(&timestamp, &body));

            for attempt in 1..=MAX_ATTEMPTS {
                let mut request = client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("Timestamp", &timestamp)
                    .body(body.clone());
                if let Some(ref sig) = signature {
                    request = request.header("Notification-Signature", sig);
                }

                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        info!(
                            transaction_id = %payload.transaction_id,
                            order_id = %payload.order_id,
                            attempt,
                            "verification worker notified"
                        );
                        return;
                    }
                    Ok(response) => {
                        warn!(
                            transaction_id = %payload.transaction_id,
                            status = %response.status(),
                            attempt,
                            "verification worker rejected notification"
                        );
                    }
                    Err(e) => {
                        warn!(
                            transaction_id = %payload.transaction_id,
                            error = %e,
                            attempt,
                            "verification notification failed"
                        );
                    }
                }

                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
            }

            warn!(
                transaction_id = %payload.transaction_id,
                "giving up on verification notification"
            );
        });
    }
}
