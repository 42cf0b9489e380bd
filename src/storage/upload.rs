use crate::storage::Storage;
use bytes::Bytes;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// A file that did not make it to storage. `key` is `None` when the walk
/// itself failed before a key could be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub path: PathBuf,
    pub key: Option<String>,
    pub reason: String,
}

/// Outcome of pushing one staging tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<UploadFailure>,
    /// Remote keys under the prefix that this run did not write.
    pub stale: Vec<String>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Object key for a file at `relative` below the staging root. Always uses
/// `/` separators.
pub fn remote_key(remote_prefix: &str, relative: &Path) -> String {
    let mut segments: Vec<String> = Vec::new();
    let prefix = remote_prefix.trim_matches('/');
    if !prefix.is_empty() {
        segments.push(prefix.to_string());
    }
    segments.extend(relative.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }));
    segments.join("/")
}

/// Uploads every regular file below `local_root` to
/// `{remote_prefix}/{relative_path}`. A failing file is recorded and the walk
/// goes on.
pub async fn upload_tree(storage: &dyn Storage, local_root: &Path, remote_prefix: &str) -> UploadReport {
    let mut report = UploadReport::default();

    for entry in collect_files(local_root).await {
        let path = match entry {
            Ok(path) => path,
            Err(failure) => {
                report.failed.push(failure);
                continue;
            }
        };

        // walkdir yields paths under the root it was given
        let relative = path.strip_prefix(local_root).unwrap_or(&path);
        let key = remote_key(remote_prefix, relative);

        let body = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!("Error reading {}: {}", path.display(), e);
                report.failed.push(UploadFailure {
                    path,
                    key: Some(key),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match storage.store_raw(&key, body).await {
            Ok(()) => {
                info!("Uploaded {} to {}/{}", path.display(), storage.location(), key);
                report.uploaded.push(key);
            }
            Err(e) => {
                warn!("Error uploading {}: {}", path.display(), e);
                report.failed.push(UploadFailure {
                    path,
                    key: Some(key),
                    reason: e.to_string(),
                });
            }
        }
    }

    // Leftovers are only reported, never deleted.
    report.stale = find_stale(storage, remote_prefix, &report).await;
    report
}

// Regular files below `local_root` in file-name order. The walk is blocking
// I/O, so it runs off the async workers.
async fn collect_files(local_root: &Path) -> Vec<Result<PathBuf, UploadFailure>> {
    let root = local_root.to_path_buf();
    let walk = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
                // directories are walked, not uploaded
                Ok(_) => None,
                Err(e) => {
                    warn!("Error walking {}: {}", root.display(), e);
                    Some(Err(UploadFailure {
                        path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
                        key: None,
                        reason: e.to_string(),
                    }))
                }
            })
            .collect::<Vec<_>>()
    })
    .await;

    walk.unwrap_or_else(|e| {
        vec![Err(UploadFailure {
            path: local_root.to_path_buf(),
            key: None,
            reason: format!("directory walk did not finish: {}", e),
        })]
    })
}

async fn find_stale(storage: &dyn Storage, remote_prefix: &str, report: &UploadReport) -> Vec<String> {
    // Trailing slash so `orders` does not match `orders-staging`.
    let prefix = format!("{}/", remote_prefix.trim_end_matches('/'));
    let written: HashSet<&str> = report
        .uploaded
        .iter()
        .chain(report.failed.iter().filter_map(|f| f.key.as_ref()))
        .map(String::as_str)
        .collect();

    match storage.list_keys_with_prefix(&prefix).await {
        Ok(keys) => {
            let stale: Vec<String> = keys
                .into_iter()
                .filter(|key| !written.contains(key.as_str()))
                .collect();
            if !stale.is_empty() {
                warn!(
                    "{} object(s) under {}/{} were not written by this run: {:?}",
                    stale.len(),
                    storage.location(),
                    prefix,
                    stale
                );
            }
            stale
        }
        Err(e) => {
            warn!("Could not list {}: {}", prefix, e);
            Vec::new()
        }
    }
}
