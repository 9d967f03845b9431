//! Outbox relay service: order event mappers and process wiring.

pub mod config;
pub mod mappers;
pub mod telemetry;
