pub mod orders;

use orders::{OrderCancelledMapper, OrderCreatedMapper, OrderShippedMapper};
use outbox_relay::{MapperRegistry, RelayResult};

/// Registry of every mapper this service relays
pub fn registry(orders_topic: &str) -> RelayResult<MapperRegistry> {
    let mut registry = MapperRegistry::new();
    registry.register(OrderCreatedMapper::new(orders_topic))?;
    registry.register(OrderCancelledMapper::new(orders_topic))?;
    registry.register(OrderShippedMapper::new(orders_topic))?;
    Ok(registry)
}
