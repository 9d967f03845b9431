//! Event mapper registry.
//!
//! Built once at startup and read-only afterwards. Mappers are pure: they turn an
//! [`Envelope`] into a [`WireMessage`] and never perform I/O.

use crate::error::{RelayError, RelayResult};
use event_schema::{Envelope, WireMessage};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait EventMapper: Send + Sync {
    /// Event type name this mapper handles, e.g. `Orders.Created`
    fn event_type(&self) -> &str;

    fn map(&self, envelope: &Envelope) -> RelayResult<WireMessage>;
}

struct FnMapper<F> {
    event_type: String,
    map: F,
}

impl<F> EventMapper for FnMapper<F>
where
    F: Fn(&Envelope) -> RelayResult<WireMessage> + Send + Sync,
{
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn map(&self, envelope: &Envelope) -> RelayResult<WireMessage> {
        (self.map)(envelope)
    }
}

#[derive(Default, Clone)]
pub struct MapperRegistry {
    mappers: HashMap<String, Arc<dyn EventMapper>>,
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapper under its event type. Registering the same type twice is a
    /// configuration error.
    pub fn register<M: EventMapper + 'static>(&mut self, mapper: M) -> RelayResult<()> {
        let event_type = mapper.event_type().to_string();
        if event_type.trim().is_empty() {
            return Err(RelayError::Config("mapper event type is empty".into()));
        }
        if self.mappers.contains_key(&event_type) {
            return Err(RelayError::Config(format!(
                "mapper already registered for event type '{}'",
                event_type
            )));
        }

        self.mappers.insert(event_type, Arc::new(mapper));
        Ok(())
    }

    pub fn register_fn<F>(&mut self, event_type: impl Into<String>, map: F) -> RelayResult<()>
    where
        F: Fn(&Envelope) -> RelayResult<WireMessage> + Send + Sync + 'static,
    {
        self.register(FnMapper {
            event_type: event_type.into(),
            map,
        })
    }

    /// Look up the mapper for `event_type`; unknown names are [`RelayError::MappingNotFound`]
    pub fn resolve(&self, event_type: &str) -> RelayResult<Arc<dyn EventMapper>> {
        self.mappers
            .get(event_type)
            .cloned()
            .ok_or_else(|| RelayError::MappingNotFound(event_type.to_string()))
    }

    pub fn map(&self, envelope: &Envelope) -> RelayResult<WireMessage> {
        self.resolve(envelope.event_type_name())?.map(envelope)
    }

    /// Registered event types, sorted
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.mappers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}
