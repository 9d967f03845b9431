use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ORDER OUTBOX EVENTS (payloads written to the outbox table)
// ============================================================================

/// Outbox event type names as written by the order service
pub mod event_types {
    pub const ORDER_CREATED: &str = "Orders.Created";
    pub const ORDER_CANCELLED: &str = "Orders.Cancelled";
    pub const ORDER_SHIPPED: &str = "Orders.Shipped";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub currency: String,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

impl OrderCreatedEvent {
    pub fn total_cents(&self) -> i64 {
        self.lines
            .iter()
            .map(|line| line.unit_price_cents * i64::from(line.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShippedEvent {
    pub order_id: Uuid,
    pub carrier: String,
    pub tracking_number: String,
    pub shipped_at: DateTime<Utc>,
}

// ============================================================================
// ORDER INTEGRATION EVENTS (what downstream consumers receive)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub currency: String,
    pub item_count: u32,
    pub total_cents: i64,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: Uuid,
    pub carrier: String,
    pub tracking_number: String,
    pub shipped_at: DateTime<Utc>,
}
