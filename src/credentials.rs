use crate::retry::{is_retryable_code, retry, RetryPolicy};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

// STS limits RoleSessionName to 64 characters of [\w+=,.@-].
const MAX_SESSION_NAME_LEN: usize = 64;
const SESSION_NAME_SUFFIX: &str = "-Backup";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to assume role {role_arn}: {reason}")]
    AssumeRole { role_arn: String, reason: String },

    #[error("Role {0} returned no credentials")]
    Empty(String),
}

/// Where an instance's cloud credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Default,
    AssumedRole { role_arn: String },
}

/// Short-lived credentials from a role assumption.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<SystemTime>,
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Credentials {
    /// Use the process's default credential chain.
    Ambient,
    Assumed(ResolvedCredentials),
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        source: &CredentialSource,
        session_name: &str,
    ) -> Result<Credentials, CredentialError>;
}

/// Deterministic role session name for an instance, e.g. `orders-Backup`.
pub fn session_name_for(instance_name: &str) -> String {
    let sanitized: String = instance_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect();

    // all ASCII after sanitizing, so chars and bytes agree
    let keep = MAX_SESSION_NAME_LEN - SESSION_NAME_SUFFIX.len();
    let truncated: String = sanitized.chars().take(keep).collect();
    format!("{}{}", truncated, SESSION_NAME_SUFFIX)
}

/// Resolves assumed roles through STS; default sources pass straight through.
pub struct StsCredentialProvider {
    client: aws_sdk_sts::Client,
    retry: RetryPolicy,
}

impl StsCredentialProvider {
    pub fn new(sdk_config: &SdkConfig, retry: RetryPolicy) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
            retry,
        }
    }

    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<ResolvedCredentials, backoff::Error<CredentialError>> {
        let output = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(|err| {
                // Throttling and 5xx codes are worth another attempt; transport errors too.
                let retryable = match &err {
                    SdkError::ServiceError(service) => is_retryable_code(service.err().code()),
                    _ => true,
                };
                let err = CredentialError::AssumeRole {
                    role_arn: role_arn.to_string(),
                    reason: DisplayErrorContext(&err).to_string(),
                };
                if retryable {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })?;

        // A successful AssumeRole without a credentials block is not retried.
        let creds = output.credentials().ok_or_else(|| {
            backoff::Error::permanent(CredentialError::Empty(role_arn.to_string()))
        })?;

        Ok(ResolvedCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: Some(creds.session_token().to_string()),
            // pre-epoch expirations are dropped
            expiration: SystemTime::try_from(creds.expiration().clone()).ok(),
        })
    }
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn resolve(
        &self,
        source: &CredentialSource,
        session_name: &str,
    ) -> Result<Credentials, CredentialError> {
        match source {
            CredentialSource::Default => {
                debug!("Using default credentials");
                Ok(Credentials::Ambient)
            }
            CredentialSource::AssumedRole { role_arn } => {
                info!(role_arn = %role_arn, session_name, "Assuming role");
                let resolved = retry(&self.retry, "sts:AssumeRole", || {
                    self.assume_role(role_arn, session_name)
                })
                .await?;
                Ok(Credentials::Assumed(resolved))
            }
        }
    }
}
