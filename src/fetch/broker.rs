use crate::credentials::Credentials;
use crate::fetch::FetchError;
use crate::model::artifact::BrokerConfiguration;
use crate::retry::{is_retryable_code, retry, RetryPolicy};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_mq::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_mq::operation::describe_broker::DescribeBrokerOutput;
use aws_sdk_mq::primitives::DateTime;
use aws_sdk_mq::types::{
    ActionRequired, AuthenticationStrategy, BrokerInstance, BrokerState, BrokerStorageType,
    ChangeType, ConfigurationId, Configurations, DataReplicationCounterpart,
    DataReplicationMetadataOutput, DataReplicationMode, DayOfWeek, DeploymentMode,
    EncryptionOptions, EngineType, LdapServerMetadataOutput, LogsSummary, PendingLogs,
    UserSummary, WeeklyStartTime,
};
use serde_json::{json, Value};
use tracing::debug;

#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn describe_broker(
        &self,
        credentials: &Credentials,
        broker_id: &str,
    ) -> Result<BrokerConfiguration, FetchError>;
}

/// Amazon MQ `DescribeBroker`.
pub struct MqBrokerApi {
    sdk_config: SdkConfig,
    retry: RetryPolicy,
}

impl MqBrokerApi {
    pub fn new(sdk_config: SdkConfig, retry: RetryPolicy) -> Self {
        Self { sdk_config, retry }
    }

    // Assumed credentials are bound to this client only; the shared config is
    // left untouched.
    fn client(&self, credentials: &Credentials) -> aws_sdk_mq::Client {
        match credentials {
            Credentials::Ambient => aws_sdk_mq::Client::new(&self.sdk_config),
            Credentials::Assumed(resolved) => {
                let provider = aws_sdk_mq::config::Credentials::new(
                    resolved.access_key_id.clone(),
                    resolved.secret_access_key.clone(),
                    resolved.session_token.clone(),
                    resolved.expiration,
                    "amq-backup-assumed-role",
                );
                let config = aws_sdk_mq::config::Builder::from(&self.sdk_config)
                    .credentials_provider(provider)
                    .build();
                aws_sdk_mq::Client::from_conf(config)
            }
        }
    }

    async fn describe_once(
        &self,
        client: &aws_sdk_mq::Client,
        broker_id: &str,
    ) -> Result<DescribeBrokerOutput, backoff::Error<FetchError>> {
        client
            .describe_broker()
            .broker_id(broker_id)
            .send()
            .await
            .map_err(|err| {
                let retryable = match &err {
                    SdkError::ServiceError(service) => is_retryable_code(service.err().code()),
                    _ => true,
                };
                let err = FetchError::Api {
                    broker_id: broker_id.to_string(),
                    reason: DisplayErrorContext(&err).to_string(),
                };
                if retryable {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
    }
}

#[async_trait]
impl BrokerApi for MqBrokerApi {
    async fn describe_broker(
        &self,
        credentials: &Credentials,
        broker_id: &str,
    ) -> Result<BrokerConfiguration, FetchError> {
        let client = self.client(credentials);
        let output = retry(&self.retry, "mq:DescribeBroker", || {
            self.describe_once(&client, broker_id)
        })
        .await?;

        debug!(broker_id, "DescribeBroker succeeded");
        Ok(BrokerConfiguration::new(describe_output_to_document(&output)))
    }
}

/// Renders a `DescribeBroker` response with the service's own field names,
/// leaving out fields the service did not send.
pub fn describe_output_to_document(output: &DescribeBrokerOutput) -> Value {
    let mut document = output.to_document();
    drop_nulls(&mut document);
    document
}

/// One SDK shape as a JSON object keyed by its wire member names.
trait ToDocument {
    fn to_document(&self) -> Value;
}

// Accessors return `&T` for required members and `Option<&T>` otherwise;
// both render the same way.
trait Render {
    fn render(self) -> Value;
}

macro_rules! renders {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Render for &$ty {
                fn render(self) -> Value {
                    self.to_document()
                }
            }

            impl Render for Option<&$ty> {
                fn render(self) -> Value {
                    self.map_or(Value::Null, ToDocument::to_document)
                }
            }

            impl Render for &[$ty] {
                fn render(self) -> Value {
                    Value::Array(self.iter().map(ToDocument::to_document).collect())
                }
            }

            impl Render for Option<&[$ty]> {
                fn render(self) -> Value {
                    self.map_or(Value::Null, Render::render)
                }
            }
        )*
    };
}

macro_rules! wire_enum {
    ($($ty:ty),* $(,)?) => {
        $(impl ToDocument for $ty {
            fn to_document(&self) -> Value {
                Value::String(self.as_str().to_string())
            }
        })*
    };
}

wire_enum!(
    AuthenticationStrategy,
    BrokerState,
    BrokerStorageType,
    ChangeType,
    DataReplicationMode,
    DayOfWeek,
    DeploymentMode,
    EngineType,
);

renders!(
    AuthenticationStrategy,
    BrokerState,
    BrokerStorageType,
    ChangeType,
    DataReplicationMode,
    DayOfWeek,
    DeploymentMode,
    EngineType,
    DateTime,
    ActionRequired,
    BrokerInstance,
    Configurations,
    ConfigurationId,
    DataReplicationMetadataOutput,
    DataReplicationCounterpart,
    EncryptionOptions,
    LdapServerMetadataOutput,
    LogsSummary,
    PendingLogs,
    WeeklyStartTime,
    UserSummary,
);

impl ToDocument for DateTime {
    fn to_document(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToDocument for DescribeBrokerOutput {
    fn to_document(&self) -> Value {
        json!({
            "ActionsRequired": self.actions_required().render(),
            "AuthenticationStrategy": self.authentication_strategy().render(),
            "AutoMinorVersionUpgrade": self.auto_minor_version_upgrade(),
            "BrokerArn": self.broker_arn(),
            "BrokerId": self.broker_id(),
            "BrokerInstances": self.broker_instances().render(),
            "BrokerName": self.broker_name(),
            "BrokerState": self.broker_state().render(),
            "Configurations": self.configurations().render(),
            "Created": self.created().render(),
            "DataReplicationMetadata": self.data_replication_metadata().render(),
            "DataReplicationMode": self.data_replication_mode().render(),
            "DeploymentMode": self.deployment_mode().render(),
            "EncryptionOptions": self.encryption_options().render(),
            "EngineType": self.engine_type().render(),
            "EngineVersion": self.engine_version(),
            "HostInstanceType": self.host_instance_type(),
            "LdapServerMetadata": self.ldap_server_metadata().render(),
            "Logs": self.logs().render(),
            "MaintenanceWindowStartTime": self.maintenance_window_start_time().render(),
            "PendingAuthenticationStrategy": self.pending_authentication_strategy().render(),
            "PendingDataReplicationMetadata": self.pending_data_replication_metadata().render(),
            "PendingDataReplicationMode": self.pending_data_replication_mode().render(),
            "PendingEngineVersion": self.pending_engine_version(),
            "PendingHostInstanceType": self.pending_host_instance_type(),
            "PendingLdapServerMetadata": self.pending_ldap_server_metadata().render(),
            "PendingSecurityGroups": self.pending_security_groups(),
            "PubliclyAccessible": self.publicly_accessible(),
            "SecurityGroups": self.security_groups(),
            "StorageType": self.storage_type().render(),
            "SubnetIds": self.subnet_ids(),
            "Tags": self.tags(),
            "Users": self.users().render(),
        })
    }
}

impl ToDocument for ActionRequired {
    fn to_document(&self) -> Value {
        json!({
            "ActionRequiredCode": self.action_required_code(),
            "ActionRequiredInfo": self.action_required_info(),
        })
    }
}

impl ToDocument for BrokerInstance {
    fn to_document(&self) -> Value {
        json!({
            "ConsoleURL": self.console_url(),
            "Endpoints": self.endpoints(),
            "IpAddress": self.ip_address(),
        })
    }
}

impl ToDocument for Configurations {
    fn to_document(&self) -> Value {
        json!({
            "Current": self.current().render(),
            "History": self.history().render(),
            "Pending": self.pending().render(),
        })
    }
}

impl ToDocument for ConfigurationId {
    fn to_document(&self) -> Value {
        json!({ "Id": self.id(), "Revision": self.revision() })
    }
}

impl ToDocument for DataReplicationMetadataOutput {
    fn to_document(&self) -> Value {
        json!({
            "DataReplicationCounterpart": self.data_replication_counterpart().render(),
            "DataReplicationRole": self.data_replication_role(),
        })
    }
}

impl ToDocument for DataReplicationCounterpart {
    fn to_document(&self) -> Value {
        json!({ "BrokerId": self.broker_id(), "Region": self.region() })
    }
}

impl ToDocument for EncryptionOptions {
    fn to_document(&self) -> Value {
        json!({
            "KmsKeyId": self.kms_key_id(),
            "UseAwsOwnedKey": self.use_aws_owned_key(),
        })
    }
}

impl ToDocument for LdapServerMetadataOutput {
    fn to_document(&self) -> Value {
        json!({
            "Hosts": self.hosts(),
            "RoleBase": self.role_base(),
            "RoleName": self.role_name(),
            "RoleSearchMatching": self.role_search_matching(),
            "RoleSearchSubtree": self.role_search_subtree(),
            "ServiceAccountUsername": self.service_account_username(),
            "UserBase": self.user_base(),
            "UserRoleName": self.user_role_name(),
            "UserSearchMatching": self.user_search_matching(),
            "UserSearchSubtree": self.user_search_subtree(),
        })
    }
}

impl ToDocument for LogsSummary {
    fn to_document(&self) -> Value {
        json!({
            "Audit": self.audit(),
            "AuditLogGroup": self.audit_log_group(),
            "General": self.general(),
            "GeneralLogGroup": self.general_log_group(),
            "Pending": self.pending().render(),
        })
    }
}

impl ToDocument for PendingLogs {
    fn to_document(&self) -> Value {
        json!({ "Audit": self.audit(), "General": self.general() })
    }
}

impl ToDocument for WeeklyStartTime {
    fn to_document(&self) -> Value {
        json!({
            "DayOfWeek": self.day_of_week().render(),
            "TimeOfDay": self.time_of_day(),
            "TimeZone": self.time_zone(),
        })
    }
}

impl ToDocument for UserSummary {
    fn to_document(&self) -> Value {
        json!({
            "PendingChange": self.pending_change().render(),
            "Username": self.username(),
        })
    }
}

fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_mq::error::BuildError;

    // `build()` only returns a `Result` for shapes with required members.
    trait Finish<T> {
        fn finish(self) -> T;
    }

    impl<T> Finish<T> for Result<T, BuildError> {
        fn finish(self) -> T {
            self.unwrap()
        }
    }

    macro_rules! infallible_build {
        ($($ty:ty),* $(,)?) => {
            $(impl Finish<$ty> for $ty {
                fn finish(self) -> $ty {
                    self
                }
            })*
        };
    }

    infallible_build!(
        DescribeBrokerOutput,
        ActionRequired,
        BrokerInstance,
        Configurations,
        ConfigurationId,
        DataReplicationMetadataOutput,
        DataReplicationCounterpart,
        EncryptionOptions,
        LdapServerMetadataOutput,
        LogsSummary,
        PendingLogs,
        UserSummary,
        WeeklyStartTime,
    );

    fn revision(id: &str, revision: i32) -> ConfigurationId {
        ConfigurationId::builder().id(id).revision(revision).build().finish()
    }

    fn ldap(host: &str) -> LdapServerMetadataOutput {
        LdapServerMetadataOutput::builder()
            .hosts(host)
            .role_base("ou=groups,dc=example,dc=com")
            .role_name("cn")
            .role_search_matching("(member={0})")
            .role_search_subtree(true)
            .service_account_username("svc-mq")
            .user_base("ou=users,dc=example,dc=com")
            .user_role_name("memberOf")
            .user_search_matching("(uid={0})")
            .user_search_subtree(false)
            .build()
            .finish()
    }

    fn replication(role: &str) -> DataReplicationMetadataOutput {
        DataReplicationMetadataOutput::builder()
            .data_replication_role(role)
            .data_replication_counterpart(
                DataReplicationCounterpart::builder()
                    .broker_id("b-replica")
                    .region("us-west-2")
                    .build()
                    .finish(),
            )
            .build()
            .finish()
    }

    fn fully_populated() -> DescribeBrokerOutput {
        DescribeBrokerOutput::builder()
            .actions_required(
                ActionRequired::builder()
                    .action_required_code("CONFIGURATION_UPDATE")
                    .action_required_info("Reboot to apply pending configuration")
                    .build()
                    .finish(),
            )
            .authentication_strategy(AuthenticationStrategy::from("SIMPLE"))
            .auto_minor_version_upgrade(true)
            .broker_arn("arn:aws:mq:us-east-1:123456789012:broker:orders:b-1234")
            .broker_id("b-1234")
            .broker_instances(
                BrokerInstance::builder()
                    .console_url("https://b-1234.mq.us-east-1.amazonaws.com")
                    .endpoints("amqps://b-1234.mq.us-east-1.amazonaws.com:5671")
                    .ip_address("10.0.0.12")
                    .build()
                    .finish(),
            )
            .broker_name("orders")
            .broker_state(BrokerState::from("RUNNING"))
            .configurations(
                Configurations::builder()
                    .current(revision("c-1", 3))
                    .history(revision("c-1", 1))
                    .history(revision("c-1", 2))
                    .pending(revision("c-1", 4))
                    .build()
                    .finish(),
            )
            .created(DateTime::from_secs(1_700_000_000))
            .data_replication_metadata(replication("PRIMARY"))
            .data_replication_mode(DataReplicationMode::from("CRDR"))
            .deployment_mode(DeploymentMode::from("CLUSTER_MULTI_AZ"))
            .encryption_options(
                EncryptionOptions::builder()
                    .kms_key_id("alias/mq")
                    .use_aws_owned_key(false)
                    .build()
                    .finish(),
            )
            .engine_type(EngineType::from("RABBITMQ"))
            .engine_version("3.13")
            .host_instance_type("mq.m5.large")
            .ldap_server_metadata(ldap("ldap.example.com"))
            .logs(
                LogsSummary::builder()
                    .audit(false)
                    .audit_log_group("/aws/amazonmq/broker/b-1234/audit")
                    .general(true)
                    .general_log_group("/aws/amazonmq/broker/b-1234/general")
                    .pending(PendingLogs::builder().audit(true).general(true).build().finish())
                    .build()
                    .finish(),
            )
            .maintenance_window_start_time(
                WeeklyStartTime::builder()
                    .day_of_week(DayOfWeek::from("SUNDAY"))
                    .time_of_day("03:00")
                    .time_zone("UTC")
                    .build()
                    .finish(),
            )
            .pending_authentication_strategy(AuthenticationStrategy::from("LDAP"))
            .pending_data_replication_metadata(replication("SECONDARY"))
            .pending_data_replication_mode(DataReplicationMode::from("NONE"))
            .pending_engine_version("3.13.1")
            .pending_host_instance_type("mq.m5.xlarge")
            .pending_ldap_server_metadata(ldap("ldap2.example.com"))
            .pending_security_groups("sg-new")
            .publicly_accessible(false)
            .security_groups("sg-old")
            .storage_type(BrokerStorageType::from("EBS"))
            .subnet_ids("subnet-a")
            .tags("team", "payments")
            .users(
                UserSummary::builder()
                    .username("admin")
                    .pending_change(ChangeType::from("UPDATE"))
                    .build()
                    .finish(),
            )
            .build()
            .finish()
    }

    #[test]
    fn renders_service_field_names() {
        let output = DescribeBrokerOutput::builder()
            .broker_id("b-1234")
            .broker_name("orders")
            .broker_state(BrokerState::Running)
            .engine_type(EngineType::Rabbitmq)
            .broker_instances(
                BrokerInstance::builder()
                    .console_url("https://b-1234.mq.us-east-1.amazonaws.com")
                    .endpoints("amqps://b-1234.mq.us-east-1.amazonaws.com:5671")
                    .build()
                    .finish(),
            )
            .build()
            .finish();

        let document = describe_output_to_document(&output);

        assert_eq!(document["BrokerId"], "b-1234");
        assert_eq!(document["BrokerState"], "RUNNING");
        assert_eq!(document["EngineType"], "RABBITMQ");
        assert_eq!(
            document["BrokerInstances"][0]["ConsoleURL"],
            "https://b-1234.mq.us-east-1.amazonaws.com"
        );
        assert!(document.get("HostInstanceType").is_none());
        assert!(document.get("Users").is_none() || document["Users"] == json!([]));
        assert!(document["BrokerInstances"][0].get("IpAddress").is_none());

        let config = BrokerConfiguration::new(document);
        assert_eq!(
            config.console_url(),
            Some("https://b-1234.mq.us-east-1.amazonaws.com")
        );
    }

    #[test]
    fn every_broker_field_is_kept() {
        let document = describe_output_to_document(&fully_populated());

        let top_level = [
            "ActionsRequired",
            "AuthenticationStrategy",
            "AutoMinorVersionUpgrade",
            "BrokerArn",
            "BrokerId",
            "BrokerInstances",
            "BrokerName",
            "BrokerState",
            "Configurations",
            "Created",
            "DataReplicationMetadata",
            "DataReplicationMode",
            "DeploymentMode",
            "EncryptionOptions",
            "EngineType",
            "EngineVersion",
            "HostInstanceType",
            "LdapServerMetadata",
            "Logs",
            "MaintenanceWindowStartTime",
            "PendingAuthenticationStrategy",
            "PendingDataReplicationMetadata",
            "PendingDataReplicationMode",
            "PendingEngineVersion",
            "PendingHostInstanceType",
            "PendingLdapServerMetadata",
            "PendingSecurityGroups",
            "PubliclyAccessible",
            "SecurityGroups",
            "StorageType",
            "SubnetIds",
            "Tags",
            "Users",
        ];
        let keys: Vec<&str> = document
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        for key in top_level {
            assert!(keys.contains(&key), "missing {}", key);
        }
        assert_eq!(keys.len(), top_level.len());

        assert_eq!(
            document["Configurations"],
            json!({
                "Current": { "Id": "c-1", "Revision": 3 },
                "History": [{ "Id": "c-1", "Revision": 1 }, { "Id": "c-1", "Revision": 2 }],
                "Pending": { "Id": "c-1", "Revision": 4 },
            })
        );
        assert_eq!(
            document["Users"],
            json!([{ "Username": "admin", "PendingChange": "UPDATE" }])
        );
        assert_eq!(
            document["MaintenanceWindowStartTime"],
            json!({ "DayOfWeek": "SUNDAY", "TimeOfDay": "03:00", "TimeZone": "UTC" })
        );
        assert_eq!(
            document["Logs"]["Pending"],
            json!({ "Audit": true, "General": true })
        );
        assert_eq!(document["Logs"]["GeneralLogGroup"], "/aws/amazonmq/broker/b-1234/general");
        assert_eq!(
            document["EncryptionOptions"],
            json!({ "KmsKeyId": "alias/mq", "UseAwsOwnedKey": false })
        );
        assert_eq!(document["AuthenticationStrategy"], "SIMPLE");
        assert_eq!(document["PendingAuthenticationStrategy"], "LDAP");
        assert_eq!(document["LdapServerMetadata"]["Hosts"], json!(["ldap.example.com"]));
        assert_eq!(document["LdapServerMetadata"]["RoleSearchSubtree"], true);
        assert_eq!(document["PendingLdapServerMetadata"]["Hosts"], json!(["ldap2.example.com"]));
        assert_eq!(
            document["DataReplicationMetadata"],
            json!({
                "DataReplicationCounterpart": { "BrokerId": "b-replica", "Region": "us-west-2" },
                "DataReplicationRole": "PRIMARY",
            })
        );
        assert_eq!(document["PendingDataReplicationMetadata"]["DataReplicationRole"], "SECONDARY");
        assert_eq!(document["DataReplicationMode"], "CRDR");
        assert_eq!(document["PendingDataReplicationMode"], "NONE");
        assert_eq!(document["PendingEngineVersion"], "3.13.1");
        assert_eq!(document["PendingHostInstanceType"], "mq.m5.xlarge");
        assert_eq!(document["PendingSecurityGroups"], json!(["sg-new"]));
        assert_eq!(document["StorageType"], "EBS");
        assert_eq!(
            document["ActionsRequired"][0]["ActionRequiredCode"],
            "CONFIGURATION_UPDATE"
        );
        assert_eq!(document["BrokerInstances"][0]["IpAddress"], "10.0.0.12");
        assert_eq!(document["Tags"], json!({ "team": "payments" }));
        assert!(document["Created"]
            .as_str()
            .unwrap()
            .starts_with("2023-11-14T22:13:20"));
    }

    #[test]
    fn drop_nulls_recurses() {
        let mut value = json!({ "a": null, "b": { "c": null, "d": 1 }, "e": [{ "f": null }] });
        drop_nulls(&mut value);
        assert_eq!(value, json!({ "b": { "d": 1 }, "e": [{}] }));
    }
}
