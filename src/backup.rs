use crate::{
    credentials::{CredentialError, CredentialProvider},
    fetch::{BrokerApi, FetchError, QueueApi},
    model::config::{BackupSettings, InstanceSpec, Schedule},
    schedule::should_run,
    staging::{self, ArtifactError, BROKER_CONFIG_FILE, QUEUES_FILE},
    storage::{upload_tree, Storage, UploadReport},
};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

// Failures that end one instance's backup early.
#[derive(Debug, Error)]
enum InstanceError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Metadata(#[from] FetchError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// How one instance's backup ended.
#[derive(Debug)]
pub enum InstanceOutcome {
    /// Not due today.
    Skipped { schedule: Schedule },
    /// No credentials, so nothing was fetched.
    CredentialFailed(CredentialError),
    /// `DescribeBroker` failed or returned no console URL.
    MetadataFailed(FetchError),
    /// The staging directory or broker configuration could not be written.
    ArtifactFailed(ArtifactError),
    /// Staged and uploaded. `queues_captured` is false when the queue listing
    /// was unavailable or could not be saved.
    Done {
        queues_captured: bool,
        upload: UploadReport,
    },
}

impl From<InstanceError> for InstanceOutcome {
    fn from(err: InstanceError) -> Self {
        match err {
            InstanceError::Credentials(e) => InstanceOutcome::CredentialFailed(e),
            InstanceError::Metadata(e) => InstanceOutcome::MetadataFailed(e),
            InstanceError::Artifact(e) => InstanceOutcome::ArtifactFailed(e),
        }
    }
}

/// Outcome of one configured instance, tagged with its name.
#[derive(Debug)]
pub struct InstanceReport {
    pub name: String,
    pub outcome: InstanceOutcome,
}

/// Everything one invocation did, in configuration order.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<InstanceReport>,
}

impl RunSummary {
    pub fn report(&self, name: &str) -> Option<&InstanceReport> {
        self.reports.iter().find(|r| r.name == name)
    }

    pub fn completed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, InstanceOutcome::Done { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, InstanceOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.completed() - self.skipped()
    }

    /// Files that could not be uploaded, across all completed instances.
    pub fn upload_failures(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match &r.outcome {
                InstanceOutcome::Done { upload, .. } => upload.failed.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Drives the backup pipeline for every configured instance.
pub struct BackupRunner {
    settings: BackupSettings,
    credentials: Arc<dyn CredentialProvider>,
    brokers: Arc<dyn BrokerApi>,
    queues: Arc<dyn QueueApi>,
    storage: Arc<dyn Storage>,
}

impl BackupRunner {
    pub fn new(
        settings: BackupSettings,
        credentials: Arc<dyn CredentialProvider>,
        brokers: Arc<dyn BrokerApi>,
        queues: Arc<dyn QueueApi>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            settings,
            credentials,
            brokers,
            queues,
            storage,
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Backs up every instance due on `today`. Reports come back in
    /// configuration order; one instance failing never stops the others.
    pub async fn run(&self, instances: &[InstanceSpec], today: NaiveDate) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("backup_run", %run_id);

        let reports = async {
            info!(
                instances = instances.len(),
                %today,
                concurrency = self.settings.max_concurrency,
                "Starting backup run"
            );
            // `buffered` keeps results in input order
            stream::iter(instances)
                .map(|instance| self.backup_instance(instance, today))
                .buffered(self.settings.max_concurrency.max(1))
                .collect::<Vec<_>>()
                .await
        }
        .instrument(span)
        .await;

        RunSummary { run_id, reports }
    }

    pub async fn backup_instance(&self, instance: &InstanceSpec, today: NaiveDate) -> InstanceReport {
        let span = info_span!("instance", instance = %instance.name);

        let outcome = async {
            if !should_run(&instance.schedule, today) {
                info!(schedule = %instance.schedule, "Skipping backup due to schedule mismatch");
                return InstanceOutcome::Skipped {
                    schedule: instance.schedule.clone(),
                };
            }

            info!("Running backup");
            match self.process(instance).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Skipping instance: {}", e);
                    e.into()
                }
            }
        }
        .instrument(span)
        .await;

        InstanceReport {
            name: instance.name.clone(),
            outcome,
        }
    }

    async fn process(&self, instance: &InstanceSpec) -> Result<InstanceOutcome, InstanceError> {
        let credentials = self
            .credentials
            .resolve(&instance.credential_source(), &instance.session_name())
            .await?;

        info!(broker_id = %instance.broker_id, "Fetching broker configuration");
        let broker_config = self
            .brokers
            .describe_broker(&credentials, &instance.broker_id)
            .await?;
        let console_url = broker_config
            .console_url()
            .ok_or_else(|| FetchError::Malformed(instance.broker_id.clone()))?
            .to_string();

        // Nothing touches the disk until the broker answered with a usable document.
        let instance_dir = self.settings.instance_dir(&instance.name);
        staging::prepare_instance_dir(&instance_dir).await?;
        staging::write_artifact(&instance_dir, BROKER_CONFIG_FILE, &broker_config).await?;

        info!(console_url = %console_url, "Fetching RabbitMQ queues");
        let queues_captured = match self
            .queues
            .fetch_queues(&console_url, &instance.rabbit_user, &instance.rabbit_password)
            .await
        {
            Some(snapshot) => {
                match staging::write_artifact(&instance_dir, QUEUES_FILE, &snapshot).await {
                    Ok(_) => {
                        info!(queues = ?snapshot.queue_count(), "Saved queue listing");
                        true
                    }
                    // The broker configuration is already staged; upload it anyway.
                    Err(e) => {
                        warn!("Queue listing not saved: {}", e);
                        false
                    }
                }
            }
            None => {
                warn!("Queue listing unavailable, omitting {}", QUEUES_FILE);
                false
            }
        };

        // Upload whatever is staged, even without the queue listing.
        let remote_prefix = self.settings.remote_prefix(&instance.name);
        info!(
            "Uploading backup to {}/{}",
            self.storage.location(),
            remote_prefix
        );
        let upload = upload_tree(self.storage.as_ref(), &instance_dir, &remote_prefix).await;
        if upload.is_complete() {
            info!(files = upload.uploaded.len(), "Backup complete");
        } else {
            warn!(
                uploaded = upload.uploaded.len(),
                failed = upload.failed.len(),
                "Backup finished with upload failures"
            );
        }

        Ok(InstanceOutcome::Done {
            queues_captured,
            upload,
        })
    }
}
