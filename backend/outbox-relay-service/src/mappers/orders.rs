use event_schema::orders::{
    event_types, OrderCancelled, OrderCancelledEvent, OrderCreatedEvent, OrderPlaced,
    OrderShipped, OrderShippedEvent,
};
use event_schema::{Envelope, IntegrationEnvelope, WireMessage};
use outbox_relay::{EventMapper, RelayError, RelayResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub const ORDERS_INTEGRATION_TOPIC: &str = "orders.integration-events";

/// Integration event type names, as seen by downstream consumers
pub mod integration_types {
    pub const ORDER_PLACED: &str = "order.placed";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const ORDER_SHIPPED: &str = "order.shipped";
}

pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

fn decode_payload<T: DeserializeOwned>(envelope: &Envelope) -> RelayResult<T> {
    envelope.payload_json().map_err(|e| {
        RelayError::Mapping(format!(
            "{} payload is invalid: {}",
            envelope.event_type_name(),
            e
        ))
    })
}

/// Wrap `data` in the versioned integration envelope, keyed by aggregate so one order's
/// events stay ordered downstream
fn integration_message<T: Serialize>(
    destination: &str,
    envelope: &Envelope,
    event_type: &str,
    order_id: Uuid,
    data: T,
) -> RelayResult<WireMessage> {
    let key = if envelope.aggregate_id().is_empty() {
        order_id.to_string()
    } else {
        envelope.aggregate_id().to_string()
    };

    let integration = IntegrationEnvelope::from_origin(envelope, event_type, data);
    Ok(WireMessage::json(destination, &integration)?
        .with_key(key)
        .with_header(EVENT_TYPE_HEADER, event_type))
}

pub struct OrderCreatedMapper {
    destination: String,
}

impl OrderCreatedMapper {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

impl EventMapper for OrderCreatedMapper {
    fn event_type(&self) -> &str {
        event_types::ORDER_CREATED
    }

    fn map(&self, envelope: &Envelope) -> RelayResult<WireMessage> {
        let event: OrderCreatedEvent = decode_payload(envelope)?;
        if event.lines.is_empty() {
            return Err(RelayError::Mapping(format!(
                "order {} has no lines",
                event.order_id
            )));
        }

        let placed = OrderPlaced {
            order_id: event.order_id,
            customer_id: event.customer_id,
            currency: event.currency.clone(),
            item_count: event.lines.iter().map(|line| line.quantity).sum(),
            total_cents: event.total_cents(),
            placed_at: event.created_at,
        };

        integration_message(
            &self.destination,
            envelope,
            integration_types::ORDER_PLACED,
            event.order_id,
            placed,
        )
    }
}

pub struct OrderCancelledMapper {
    destination: String,
}

impl OrderCancelledMapper {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

impl EventMapper for OrderCancelledMapper {
    fn event_type(&self) -> &str {
        event_types::ORDER_CANCELLED
    }

    fn map(&self, envelope: &Envelope) -> RelayResult<WireMessage> {
        let event: OrderCancelledEvent = decode_payload(envelope)?;

        integration_message(
            &self.destination,
            envelope,
            integration_types::ORDER_CANCELLED,
            event.order_id,
            OrderCancelled {
                order_id: event.order_id,
                reason: event.reason,
                cancelled_at: event.cancelled_at,
            },
        )
    }
}

pub struct OrderShippedMapper {
    destination: String,
}

impl OrderShippedMapper {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

impl EventMapper for OrderShippedMapper {
    fn event_type(&self) -> &str {
        event_types::ORDER_SHIPPED
    }

    fn map(&self, envelope: &Envelope) -> RelayResult<WireMessage> {
        let event: OrderShippedEvent = decode_payload(envelope)?;
        if event.tracking_number.trim().is_empty() {
            return Err(RelayError::Mapping(format!(
                "shipment for order {} has no tracking number",
                event.order_id
            )));
        }

        integration_message(
            &self.destination,
            envelope,
            integration_types::ORDER_SHIPPED,
            event.order_id,
            OrderShipped {
                order_id: event.order_id,
                carrier: event.carrier,
                tracking_number: event.tracking_number,
                shipped_at: event.shipped_at,
            },
        )
    }
}
