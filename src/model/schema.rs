use crate::model::config::ConfigError;
use serde_json::{json, Value};

// Shape of the configuration document, checked before deserialization so that
// every missing or mistyped field is reported at once.
fn config_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["amq_instances"],
        "additionalProperties": false,
        "properties": {
            "settings": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "region": { "type": "string", "minLength": 1 },
                    "bucket": { "type": "string", "minLength": 1 },
                    "backup_path_prefix": { "type": "string" },
                    "backup_root": { "type": "string", "minLength": 1 },
                    "request_timeout_secs": { "type": "integer", "minimum": 1 },
                    "max_concurrency": { "type": "integer", "minimum": 1 },
                    "retry_window_secs": { "type": "integer", "minimum": 0 }
                }
            },
            "amq_instances": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "broker_id", "rabbit_user", "rabbit_password", "schedule"],
                    "additionalProperties": false,
                    "properties": {
                        "name": { "type": "string", "minLength": 1 },
                        "broker_id": { "type": "string", "minLength": 1 },
                        "role_arn": { "type": ["string", "null"] },
                        "rabbit_user": { "type": "string", "minLength": 1 },
                        "rabbit_password": { "type": "string" },
                        "schedule": { "type": "string" }
                    }
                }
            }
        }
    })
}

pub fn validate_document(document: &Value) -> Result<(), ConfigError> {
    let schema = config_schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| ConfigError::Schema(format!("invalid built-in schema: {}", e)))?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| {
            let location = e.instance_path.to_string();
            if location.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", location, e)
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Schema(errors.join(", ")))
    }
}
