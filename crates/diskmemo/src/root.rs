//! Cache root directory: enumeration, statistics and maintenance

use crate::diagnostics::{CacheEvent, Diagnostics};
use crate::instance::{CacheInstance, PayloadKind, directory_size};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A directory holding zero or more cache instances.
///
/// Every direct subdirectory is treated as an instance, committed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoot {
    path: PathBuf,
}

/// Aggregate size of a cache root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RootStats {
    /// Number of instance directories
    pub instance_count: usize,
    /// Sum of all file sizes under the root
    pub total_size_bytes: u64,
}

impl RootStats {
    /// Total size in MiB
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Inspection record for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    /// Instance id
    pub id: String,
    /// Whether the descriptor record exists
    pub committed: bool,
    /// Payload present on disk, if any
    pub payload_kind: Option<PayloadKind>,
    /// Last usage, or directory modification time as a fallback
    pub last_used_at: Option<DateTime<Utc>>,
    /// Size of all files in the instance
    pub size_bytes: u64,
}

impl CacheRoot {
    /// Open `path` as a cache root, creating the directory if needed.
    ///
    /// The parent directory must already exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_dir() {
            return Ok(Self { path });
        }
        if path.exists() {
            return Err(Error::configuration(format!(
                "Cache root '{}' exists but is not a directory",
                path.display()
            )));
        }
        let parent_exists = path
            .parent()
            .is_none_or(|p| p.as_os_str().is_empty() || p.is_dir());
        if !parent_exists {
            return Err(Error::configuration(format!(
                "Parent directory of cache root '{}' does not exist",
                path.display()
            )));
        }
        fs::create_dir(&path).map_err(|e| Error::io(e, &path, "create_dir"))?;
        tracing::info!(root = %path.display(), "Created cache root");
        Ok(Self { path })
    }

    /// Root directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All instance directories, sorted by id.
    pub fn instances(&self) -> Result<Vec<CacheInstance>> {
        let entries =
            fs::read_dir(&self.path).map_err(|e| Error::io(e, &self.path, "read_dir"))?;
        let mut instances = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.path, "read_dir_entry"))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match CacheInstance::from_path(path) {
                Some(instance) => instances.push(instance),
                None => tracing::warn!(
                    path = %entry.path().display(),
                    "Ignoring cache directory with a non UTF-8 name"
                ),
            }
        }
        instances.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(instances)
    }

    /// Instance count and recursive size of every file under the root.
    pub fn stats(&self) -> Result<RootStats> {
        let instance_count = self.instances()?.len();
        Ok(RootStats {
            instance_count,
            total_size_bytes: directory_size(&self.path),
        })
    }

    /// Delete every instance directory.
    ///
    /// Each directory is attempted even if an earlier one fails. Returns the
    /// number removed, or [`Error::ClearIncomplete`] naming the failures.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut failed = Vec::new();
        for instance in self.instances()? {
            match instance.remove() {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(instance = %instance.id(), "Failed to remove cache instance: {e}");
                    failed.push(instance.path().to_path_buf());
                }
            }
        }
        tracing::info!(root = %self.path.display(), removed, "Cleared cache root");
        if failed.is_empty() {
            Ok(removed)
        } else {
            Err(Error::ClearIncomplete { failed })
        }
    }

    /// Per-instance inspection records, sorted by id.
    pub fn instance_infos(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self
            .instances()?
            .into_iter()
            .map(|instance| InstanceInfo {
                committed: instance.is_committed(),
                payload_kind: instance.payload_kind(),
                last_used_at: instance.last_used_at().map(DateTime::<Utc>::from),
                size_bytes: instance.size_bytes(),
                id: instance.id().to_string(),
            })
            .collect())
    }

    /// Delete uncommitted instances whose directory is older than `min_age`.
    ///
    /// Younger ones may belong to a computation still in progress and are left
    /// alone.
    pub fn sweep_orphans(&self, min_age: Duration, diagnostics: &dyn Diagnostics) -> Result<usize> {
        let now = SystemTime::now();
        let mut swept = 0;
        for instance in self.instances()? {
            if instance.is_committed() {
                continue;
            }
            let age = instance
                .modified_at()
                .ok()
                .and_then(|at| now.duration_since(at).ok())
                .unwrap_or(Duration::ZERO);
            if age < min_age {
                continue;
            }
            match instance.remove() {
                Ok(()) => {
                    swept += 1;
                    diagnostics.emit(CacheEvent::OrphanSwept {
                        instance: instance.id().to_string(),
                    });
                }
                Err(e) => tracing::warn!(
                    instance = %instance.id(),
                    "Failed to remove uncommitted cache instance: {e}"
                ),
            }
        }
        Ok(swept)
    }
}
