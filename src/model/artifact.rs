use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broker description as returned by the broker-management API.
///
/// Kept as an opaque document: it is written to staging verbatim and never
/// edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerConfiguration(Value);

impl BrokerConfiguration {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    pub fn document(&self) -> &Value {
        &self.0
    }

    /// Console URL of the first broker instance that exposes one.
    pub fn console_url(&self) -> Option<&str> {
        self.0
            .get("BrokerInstances")?
            .as_array()?
            .iter()
            .filter_map(|instance| instance.get("ConsoleURL")?.as_str())
            .find(|url| !url.trim().is_empty())
    }
}

/// Queue listing from the RabbitMQ management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueSnapshot(Value);

impl QueueSnapshot {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    pub fn document(&self) -> &Value {
        &self.0
    }

    // The management API answers with a bare array; some proxies wrap it.
    pub fn queue_count(&self) -> Option<usize> {
        match &self.0 {
            Value::Array(queues) => Some(queues.len()),
            Value::Object(map) => map.get("queues")?.as_array().map(Vec::len),
            _ => None,
        }
    }
}
