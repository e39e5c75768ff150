use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Checkout lifecycle events. Delivery is best-effort and in-process; a
/// full send failure never fails the checkout that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutStarted {
        attempt_id: Uuid,
    },
    OrderCreated(Uuid),
    /// A retried payment found its original order gone and created a
    /// replacement under a new identity. Callers also see this via
    /// `OrderPlacement::RecreatedAfterMissing`.
    RetryOrderRecreated {
        original_order_id: Uuid,
        new_order_id: Uuid,
    },
    PaymentInitiated {
        order_id: Uuid,
        transaction_id: Uuid,
        amount: Decimal,
    },
    PaymentCompleted {
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, logging (not propagating) delivery failure.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "failed to send event");
        }
    }
}

/// Consumes and logs events until all senders are dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::RetryOrderRecreated {
                original_order_id,
                new_order_id,
            } => {
                warn!(
                    original_order_id = %original_order_id,
                    new_order_id = %new_order_id,
                    "retry fell back to a new order"
                );
            }
            other => info!(event = ?other, "event processed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn send_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sender = EventSender::new(tx);
        sender
            .send(Event::PaymentCompleted {
                order_id: Uuid::new_v4(),
                amount: dec!(899.58),
            })
            .await;
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let attempt_id = Uuid::new_v4();
        sender.send(Event::CheckoutStarted { attempt_id }).await;

        match rx.recv().await {
            Some(Event::CheckoutStarted { attempt_id: got }) => assert_eq!(got, attempt_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
