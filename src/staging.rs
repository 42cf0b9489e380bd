//! Local staging area: one directory per instance, holding the artifacts that
//! are uploaded at the end of that instance's backup.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const BROKER_CONFIG_FILE: &str = "broker_config.json";
pub const QUEUES_FILE: &str = "queues.json";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to prepare staging directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize {filename}: {source}")]
    Serialize {
        filename: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Empties the instance directory left by an earlier run and recreates it.
pub async fn prepare_instance_dir(instance_dir: &Path) -> Result<(), ArtifactError> {
    match tokio::fs::remove_dir_all(instance_dir).await {
        Ok(()) => debug!(path = %instance_dir.display(), "Cleared previous staging directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ArtifactError::Prepare {
                path: instance_dir.to_path_buf(),
                source,
            })
        }
    }

    tokio::fs::create_dir_all(instance_dir)
        .await
        .map_err(|source| ArtifactError::Prepare {
            path: instance_dir.to_path_buf(),
            source,
        })
}

/// Pretty-printed JSON with object keys sorted at every level and a trailing
/// newline. Equal documents always produce equal bytes.
pub fn canonical_json<T: Serialize + ?Sized>(document: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = sort_keys(serde_json::to_value(document)?);

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Writes `document` to `instance_dir/filename`, creating the directory if
/// needed. The file appears complete or not at all.
pub async fn write_artifact<T: Serialize + ?Sized>(
    instance_dir: &Path,
    filename: &str,
    document: &T,
) -> Result<PathBuf, ArtifactError> {
    let bytes = canonical_json(document).map_err(|source| ArtifactError::Serialize {
        filename: filename.to_string(),
        source,
    })?;

    tokio::fs::create_dir_all(instance_dir)
        .await
        .map_err(|source| ArtifactError::Prepare {
            path: instance_dir.to_path_buf(),
            source,
        })?;

    let path = instance_dir.join(filename);
    let partial = instance_dir.join(format!(".{}.partial", filename));
    let written = async {
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await
    }
    .await;

    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ArtifactError::Write { path, source });
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    Ok(path)
}
