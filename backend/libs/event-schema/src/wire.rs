use crate::headers::Headers;
use serde::Serialize;

/// Outbound message produced by an event mapper and handed to a publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Destination topic on the downstream broker
    pub destination: String,
    /// Partition key; messages sharing a key keep their relative order downstream.
    /// Raw bytes so dead-lettered records keep non-UTF-8 keys intact.
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl WireMessage {
    pub fn new(destination: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            destination: destination.into(),
            key: None,
            payload,
            headers: Headers::new(),
        }
    }

    /// Serialize `value` as the JSON payload
    pub fn json<T: Serialize>(
        destination: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(destination, serde_json::to_vec(value)?))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into().into_bytes());
        self
    }

    pub fn with_raw_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    /// The key as text, when it is valid UTF-8
    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|key| std::str::from_utf8(key).ok())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
