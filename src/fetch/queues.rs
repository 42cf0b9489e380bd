use crate::fetch::FetchError;
use crate::model::artifact::QueueSnapshot;
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const QUEUES_PATH: &str = "/api/queues";

/// Best-effort queue listing: any failure yields `None`.
#[async_trait]
pub trait QueueApi: Send + Sync {
    async fn fetch_queues(
        &self,
        console_url: &str,
        user: &str,
        password: &str,
    ) -> Option<QueueSnapshot>;
}

pub fn queues_url(console_url: &str) -> String {
    format!("{}{}", console_url.trim_end_matches('/'), QUEUES_PATH)
}

/// RabbitMQ management HTTP API.
pub struct HttpQueueApi {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpQueueApi {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client, retry })
    }

    async fn get_once(
        &self,
        url: &str,
        user: &str,
        password: &str,
    ) -> Result<Value, backoff::Error<FetchError>> {
        let response = self
            .client
            .get(url)
            .basic_auth(user, Some(password))
            .send()
            .await
            .map_err(|e| backoff::Error::transient(FetchError::Http(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let err = FetchError::Http(format!("GET {} returned {}", url, status));
            // Auth and not-found answers will not change on retry.
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| backoff::Error::permanent(FetchError::Http(e.to_string())))
    }
}

#[async_trait]
impl QueueApi for HttpQueueApi {
    async fn fetch_queues(
        &self,
        console_url: &str,
        user: &str,
        password: &str,
    ) -> Option<QueueSnapshot> {
        let url = queues_url(console_url);
        match retry(&self.retry, "rabbitmq:list-queues", || {
            self.get_once(&url, user, password)
        })
        .await
        {
            Ok(document) => {
                debug!(url = %url, "Fetched queue listing");
                Some(QueueSnapshot::new(document))
            }
            Err(e) => {
                warn!(url = %url, "Error fetching RabbitMQ queues: {}", e);
                None
            }
        }
    }
}
