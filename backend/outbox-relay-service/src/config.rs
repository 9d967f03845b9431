//! Service-level settings that sit outside the relay's `RELAY_*` namespace.

use crate::mappers::orders::ORDERS_INTEGRATION_TOPIC;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Destination for order integration events
    #[serde(default = "default_orders_integration_topic")]
    pub orders_integration_topic: String,
}

fn default_orders_integration_topic() -> String {
    ORDERS_INTEGRATION_TOPIC.to_string()
}

impl ServiceConfig {
    /// Read from the process environment; `.env` is loaded by `RelayConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        let config: ServiceConfig =
            envy::from_env().context("Failed to read service configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.orders_integration_topic.trim().is_empty() {
            anyhow::bail!("ORDERS_INTEGRATION_TOPIC must not be empty");
        }
        Ok(())
    }
}
