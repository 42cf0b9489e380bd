use amq_backup::{
    aws::load_sdk_config,
    credentials::StsCredentialProvider,
    fetch::{HttpQueueApi, MqBrokerApi},
    storage::{MemoryStorage, S3Storage, Storage},
    BackupConfig, BackupRunner, InstanceOutcome,
};
use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(
    name = "amq-backup",
    version,
    about = "Back up Amazon MQ broker configuration and RabbitMQ queue listings to S3"
)]
struct Cli {
    /// Path to the YAML configuration file
    config: PathBuf,

    /// Stage artifacts locally but keep uploads in memory instead of S3
    #[arg(long)]
    dry_run: bool,

    /// Evaluate schedules against this date (YYYY-MM-DD) instead of today
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    if !cli.config.exists() {
        bail!("Configuration file {} does not exist", cli.config.display());
    }

    let config = BackupConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let settings = config.settings.clone();
    let retry = settings.retry_policy();

    let sdk_config = load_sdk_config(&settings).await;
    let memory = Arc::new(MemoryStorage::new());
    let storage: Arc<dyn Storage> = if cli.dry_run {
        info!("Dry run: uploads are kept in memory");
        memory.clone() as Arc<dyn Storage>
    } else {
        Arc::new(S3Storage::new(&sdk_config, &settings.bucket, retry)) as Arc<dyn Storage>
    };

    let runner = BackupRunner::new(
        settings.clone(),
        Arc::new(StsCredentialProvider::new(&sdk_config, retry)),
        Arc::new(MqBrokerApi::new(sdk_config.clone(), retry)),
        Arc::new(HttpQueueApi::new(settings.request_timeout(), retry)?),
        storage,
    );

    let today = cli.date.unwrap_or_else(|| Local::now().date_naive());
    let summary = runner.run(&config.amq_instances, today).await;

    for report in &summary.reports {
        match &report.outcome {
            InstanceOutcome::Skipped { .. } | InstanceOutcome::Done { .. } => {}
            InstanceOutcome::CredentialFailed(e) => warn!(instance = %report.name, "Credentials: {}", e),
            InstanceOutcome::MetadataFailed(e) => warn!(instance = %report.name, "Broker metadata: {}", e),
            InstanceOutcome::ArtifactFailed(e) => error!(instance = %report.name, "Staging: {}", e),
        }
    }
    if cli.dry_run {
        for key in memory.keys().await {
            info!("Would upload {}", key);
        }
    }

    info!(
        run_id = %summary.run_id,
        completed = summary.completed(),
        skipped = summary.skipped(),
        failed = summary.failed(),
        upload_failures = summary.upload_failures(),
        "Backup run finished"
    );
    Ok(())
}
