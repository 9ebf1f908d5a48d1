use crate::entities::{DeliveryStatus, OrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender and the receiver to hand to [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

/// Things that happened in the order, stock and delivery subsystems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderUpdated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),

    DeliveryAssigned {
        delivery_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
    },
    DeliveryStatusChanged {
        delivery_id: Uuid,
        old_status: DeliveryStatus,
        new_status: DeliveryStatus,
    },

    StockMovementRecorded {
        item_id: Uuid,
        movement_id: Uuid,
        new_quantity: Decimal,
    },
    LowStock {
        item_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        min_threshold: Decimal,
    },
}

/// Drains the channel until every sender is dropped, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::LowStock {
                item_id,
                quantity,
                min_threshold,
                ..
            } => {
                warn!(
                    item_id = %item_id,
                    quantity = %quantity,
                    min_threshold = %min_threshold,
                    "Stock at or below minimum threshold"
                );
            }
            other => match serde_json::to_string(other) {
                Ok(payload) => info!(payload = %payload, "Received event"),
                Err(e) => warn!(error = %e, "Failed to serialize event: {:?}", other),
            },
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_receiver_dropped_reports_error() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        assert!(sender.send(Event::OrderCreated(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }

    #[test]
    fn events_serialize_with_snake_case_statuses() {
        let order_id = Uuid::nil();
        let json = serde_json::to_value(Event::OrderStatusChanged {
            order_id,
            old_status: OrderStatus::Ready,
            new_status: OrderStatus::EnRoute,
        })
        .unwrap();
        assert_eq!(json["OrderStatusChanged"]["old_status"], "ready");
        assert_eq!(json["OrderStatusChanged"]["new_status"], "en_route");
    }

    #[tokio::test]
    async fn process_events_stops_when_senders_drop() {
        let (sender, rx) = EventSender::channel(4);
        sender
            .send(Event::OrderCancelled(Uuid::new_v4()))
            .await
            .unwrap();
        drop(sender);
        process_events(rx).await;
    }
}
