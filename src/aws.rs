use crate::model::config::BackupSettings;
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::Region;

/// Shared SDK configuration: the configured region and a per-operation
/// timeout so one unresponsive endpoint cannot stall the batch.
pub async fn load_sdk_config(settings: &BackupSettings) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(Region::new(settings.region.clone()))
        .or_default_provider();
    let timeouts = TimeoutConfig::builder()
        .operation_timeout(settings.request_timeout())
        .build();

    aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .timeout_config(timeouts)
        .load()
        .await
}
