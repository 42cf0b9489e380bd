use thiserror::Error;

pub mod broker;
pub mod queues;

pub use broker::{BrokerApi, MqBrokerApi};
pub use queues::{HttpQueueApi, QueueApi};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("DescribeBroker failed for {broker_id}: {reason}")]
    Api { broker_id: String, reason: String },

    #[error("Broker {0} response has no broker instance exposing a console URL")]
    Malformed(String),

    #[error("Queue listing request failed: {0}")]
    Http(String),
}
