use backoff::ExponentialBackoff;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Error codes that AWS services return for conditions worth retrying.
const RETRYABLE_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "InternalServerErrorException",
    "RequestTimeout",
    "ServiceUnavailable",
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
];

pub fn is_retryable_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| RETRYABLE_CODES.contains(&code))
}

/// Bounded exponential backoff around one network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub window: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.window),
            ..ExponentialBackoff::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy window is
/// used up. The last error is returned on exhaustion.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
{
    if policy.window.is_zero() {
        return op().await.map_err(into_inner);
    }

    backoff::future::retry_notify(policy.backoff(), op, |err: E, wait: Duration| {
        warn!(operation, ?wait, "Retrying after error: {}", err);
    })
    .await
}

fn into_inner<E>(err: backoff::Error<E>) -> E {
    match err {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    }
}
