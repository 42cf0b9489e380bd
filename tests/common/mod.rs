//! Fake collaborators for driving the backup pipeline without AWS.
#![allow(dead_code)]

use amq_backup::credentials::{
    CredentialError, CredentialProvider, CredentialSource, Credentials, ResolvedCredentials,
};
use amq_backup::fetch::{BrokerApi, FetchError, QueueApi};
use amq_backup::model::artifact::{BrokerConfiguration, QueueSnapshot};
use amq_backup::staging::QUEUES_FILE;
use amq_backup::storage::MemoryStorage;
use amq_backup::{BackupRunner, BackupSettings, InstanceSpec, Schedule};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const PREFIX: &str = "amq-backups";

/// Assumes any role except the ones listed as failing.
#[derive(Default)]
pub struct FakeCredentials {
    pub failing_roles: HashSet<String>,
    pub sessions: Mutex<Vec<String>>,
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn resolve(
        &self,
        source: &CredentialSource,
        session_name: &str,
    ) -> Result<Credentials, CredentialError> {
        self.sessions.lock().unwrap().push(session_name.to_string());
        match source {
            CredentialSource::Default => Ok(Credentials::Ambient),
            CredentialSource::AssumedRole { role_arn } if self.failing_roles.contains(role_arn) => {
                Err(CredentialError::AssumeRole {
                    role_arn: role_arn.clone(),
                    reason: "AccessDenied".into(),
                })
            }
            CredentialSource::AssumedRole { .. } => Ok(Credentials::Assumed(ResolvedCredentials {
                access_key_id: "AKIATEST".into(),
                secret_access_key: "secret".into(),
                session_token: Some("token".into()),
                expiration: None,
            })),
        }
    }
}

/// Broker documents keyed by broker id; unknown ids fail like a NotFound.
#[derive(Default)]
pub struct FakeBrokers {
    pub documents: HashMap<String, Value>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeBrokers {
    pub fn with(mut self, broker_id: &str, document: Value) -> Self {
        self.documents.insert(broker_id.to_string(), document);
        self
    }
}

#[async_trait]
impl BrokerApi for FakeBrokers {
    async fn describe_broker(
        &self,
        _credentials: &Credentials,
        broker_id: &str,
    ) -> Result<BrokerConfiguration, FetchError> {
        self.calls.lock().unwrap().push(broker_id.to_string());
        self.documents
            .get(broker_id)
            .cloned()
            .map(BrokerConfiguration::new)
            .ok_or_else(|| FetchError::Api {
                broker_id: broker_id.to_string(),
                reason: "NotFoundException".into(),
            })
    }
}

/// Queue listings keyed by console URL; unknown URLs behave like an HTTP error.
#[derive(Default)]
pub struct FakeQueues {
    pub listings: HashMap<String, Value>,
    pub requests: Mutex<Vec<(String, String, String)>>,
    /// Staging directory whose `queues.json` is occupied by a directory
    /// just before the listing is returned.
    pub occupy_queue_file_in: Option<PathBuf>,
}

impl FakeQueues {
    pub fn with(mut self, console_url: &str, listing: Value) -> Self {
        self.listings.insert(console_url.to_string(), listing);
        self
    }

    pub fn occupying_queue_file_in(mut self, instance_dir: PathBuf) -> Self {
        self.occupy_queue_file_in = Some(instance_dir);
        self
    }
}

#[async_trait]
impl QueueApi for FakeQueues {
    async fn fetch_queues(
        &self,
        console_url: &str,
        user: &str,
        password: &str,
    ) -> Option<QueueSnapshot> {
        self.requests.lock().unwrap().push((
            console_url.to_string(),
            user.to_string(),
            password.to_string(),
        ));
        if let Some(dir) = &self.occupy_queue_file_in {
            std::fs::create_dir_all(dir.join(QUEUES_FILE)).unwrap();
        }
        self.listings.get(console_url).cloned().map(QueueSnapshot::new)
    }
}

pub fn console_url(broker_id: &str) -> String {
    format!("https://{}.mq.us-east-1.amazonaws.com", broker_id)
}

pub fn broker_document(broker_id: &str) -> Value {
    json!({
        "BrokerId": broker_id,
        "BrokerName": broker_id,
        "EngineType": "RABBITMQ",
        "BrokerInstances": [ { "ConsoleURL": console_url(broker_id), "Endpoints": [] } ]
    })
}

pub fn instance(name: &str, broker_id: &str, role_arn: Option<&str>, schedule: &str) -> InstanceSpec {
    InstanceSpec {
        name: name.to_string(),
        broker_id: broker_id.to_string(),
        role_arn: role_arn.map(String::from),
        rabbit_user: "backup".to_string(),
        rabbit_password: "s3cret".to_string(),
        schedule: Schedule::from(schedule),
    }
}

pub fn settings(backup_root: &Path) -> BackupSettings {
    BackupSettings {
        backup_root: backup_root.to_path_buf(),
        bucket: "test-bucket".to_string(),
        backup_path_prefix: PREFIX.to_string(),
        ..BackupSettings::default()
    }
}

pub struct Harness {
    pub runner: BackupRunner,
    pub credentials: Arc<FakeCredentials>,
    pub brokers: Arc<FakeBrokers>,
    pub queues: Arc<FakeQueues>,
    pub storage: Arc<MemoryStorage>,
}

pub fn harness(
    settings: BackupSettings,
    credentials: FakeCredentials,
    brokers: FakeBrokers,
    queues: FakeQueues,
) -> Harness {
    let credentials = Arc::new(credentials);
    let brokers = Arc::new(brokers);
    let queues = Arc::new(queues);
    let storage = Arc::new(MemoryStorage::new());
    let runner = BackupRunner::new(
        settings,
        credentials.clone(),
        brokers.clone(),
        queues.clone(),
        storage.clone(),
    );
    Harness {
        runner,
        credentials,
        brokers,
        queues,
        storage,
    }
}
