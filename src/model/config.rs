use crate::credentials::{session_name_for, CredentialSource};
use crate::model::schema::validate_document;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUCKET: &str = "your-s3-bucket-name";
pub const DEFAULT_BACKUP_PATH_PREFIX: &str = "amq-backups";
pub const DEFAULT_BACKUP_ROOT: &str = "./backups";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_WINDOW_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration is not valid YAML: {0}")]
    Parse(String),

    #[error("Configuration schema validation failed: {0}")]
    Schema(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How often an instance is backed up.
///
/// Unrecognized values are kept rather than rejected so that the scheduler
/// can report them as a skip.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Schedule {
    Daily,
    Weekly,
    Monthly,
    Other(String),
}

impl From<String> for Schedule {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "daily" => Schedule::Daily,
            "weekly" => Schedule::Weekly,
            "monthly" => Schedule::Monthly,
            _ => Schedule::Other(value),
        }
    }
}

impl From<&str> for Schedule {
    fn from(value: &str) -> Self {
        Schedule::from(value.to_string())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily => f.write_str("daily"),
            Schedule::Weekly => f.write_str("weekly"),
            Schedule::Monthly => f.write_str("monthly"),
            Schedule::Other(raw) => f.write_str(raw),
        }
    }
}

/// One broker to back up, as listed under `amq_instances`.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpec {
    pub name: String,
    pub broker_id: String,
    #[serde(default)]
    pub role_arn: Option<String>,
    pub rabbit_user: String,
    pub rabbit_password: String,
    pub schedule: Schedule,
}

impl InstanceSpec {
    /// A blank `role_arn` means the process credentials are used.
    pub fn credential_source(&self) -> CredentialSource {
        match self.role_arn.as_deref().map(str::trim) {
            Some(role_arn) if !role_arn.is_empty() => CredentialSource::AssumedRole {
                role_arn: role_arn.to_string(),
            },
            _ => CredentialSource::Default,
        }
    }

    pub fn session_name(&self) -> String {
        session_name_for(&self.name)
    }
}

impl fmt::Debug for InstanceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceSpec")
            .field("name", &self.name)
            .field("broker_id", &self.broker_id)
            .field("role_arn", &self.role_arn)
            .field("rabbit_user", &self.rabbit_user)
            .field("rabbit_password", &"<redacted>")
            .field("schedule", &self.schedule)
            .finish()
    }
}

/// Run-wide settings. Every field has a default so the `settings` block can be
/// omitted entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupSettings {
    pub region: String,
    pub bucket: String,
    pub backup_path_prefix: String,
    pub backup_root: PathBuf,
    pub request_timeout_secs: u64,
    pub max_concurrency: usize,
    pub retry_window_secs: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            backup_path_prefix: DEFAULT_BACKUP_PATH_PREFIX.to_string(),
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_concurrency: 1,
            retry_window_secs: DEFAULT_RETRY_WINDOW_SECS,
        }
    }
}

impl BackupSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.retry_window_secs))
    }

    /// Local staging directory of one instance.
    pub fn instance_dir(&self, instance_name: &str) -> PathBuf {
        self.backup_root.join(instance_name)
    }

    /// Remote key prefix of one instance, without a trailing slash.
    pub fn remote_prefix(&self, instance_name: &str) -> String {
        let prefix = self.backup_path_prefix.trim_matches('/');
        if prefix.is_empty() {
            instance_name.to_string()
        } else {
            format!("{}/{}", prefix, instance_name)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[serde(default)]
    pub settings: BackupSettings,
    pub amq_instances: Vec<InstanceSpec>,
}

impl BackupConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let document: Value =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate_document(&document)?;

        let config: BackupConfig =
            serde_json::from_value(document).map_err(|e| ConfigError::Schema(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("settings.bucket must not be empty".into()));
        }
        if self.settings.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "settings.max_concurrency must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, instance) in self.amq_instances.iter().enumerate() {
            validate_instance_name(&instance.name)
                .map_err(|reason| ConfigError::Invalid(format!("amq_instances[{}]: {}", index, reason)))?;

            for (field, value) in [
                ("broker_id", &instance.broker_id),
                ("rabbit_user", &instance.rabbit_user),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "amq_instances[{}] ({}): {} must not be empty",
                        index, instance.name, field
                    )));
                }
            }

            // Names are staging directories and key segments, so they must be unique.
            if !seen.insert(instance.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate instance name '{}'",
                    instance.name
                )));
            }
        }

        Ok(())
    }
}

fn validate_instance_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be empty".into());
    }
    if name != name.trim() {
        return Err(format!("name '{}' has leading or trailing whitespace", name));
    }
    if name == "." || name == ".." {
        return Err(format!("name '{}' is not a valid directory name", name));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(format!(
            "name '{}' must be a single path segment without separators",
            name
        ));
    }
    Ok(())
}
