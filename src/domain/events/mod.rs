//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{Order, OrderStatus, Payment, PaymentState};

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, user_id: Uuid, total: Decimal, lines: usize },
    StatusChanged { order_id: Uuid, status: OrderStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    Initiated { payment_id: Uuid, order_id: Uuid, amount: Decimal },
    StatusChanged { payment_id: Uuid, order_id: Uuid, status: PaymentState },
}

impl DomainEvent {
    pub fn order_placed(order: &Order, lines: usize) -> Self {
        Self::Order(OrderEvent::Placed { order_id: order.id, order_number: order.order_number.clone(), user_id: order.user_id, total: order.total, lines })
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "shop.orders.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "shop.orders.status",
            Self::Payment(PaymentEvent::Initiated { .. }) => "shop.payments.initiated",
            Self::Payment(PaymentEvent::StatusChanged { .. }) => "shop.payments.status",
        }
    }
}

impl From<&Payment> for DomainEvent {
    fn from(p: &Payment) -> Self {
        Self::Payment(PaymentEvent::StatusChanged { payment_id: p.id, order_id: p.order_id, status: p.status })
    }
}

/// Fire-and-forget publisher; events are dropped when NATS is not configured.
#[derive(Clone, Default)]
pub struct EventPublisher { nats: Option<async_nats::Client> }

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn publish(&self, event: DomainEvent) {
        let Some(client) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => { tracing::warn!(error = %e, "failed to encode domain event"); return; }
        };
        if let Err(e) = client.publish(event.subject().to_string(), payload.into()).await {
            tracing::warn!(error = %e, subject = event.subject(), "failed to publish domain event");
        }
    }
}
