//! Cache instances: one directory per materialized result
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!   2026-10-19__14-03-27__1f9c2a7b__cache__render/
//!     config.yaml            descriptor record (written last: the commit point)
//!     single-cache.bin       single payload, or
//!     iterable-cache.store   sequence payload
//!     .last-usage            nanoseconds since the epoch of the last read
//! ```
//!
//! ## Lifecycle
//!
//! [`create`] allocates an empty directory and returns a [`PendingInstance`].
//! Writing the payload turns it into a [`WrittenInstance`], and committing
//! that writes the descriptor record and yields a visible [`CacheInstance`].
//! Both guards delete the directory when dropped before commit, so an error,
//! a cancellation or a panic between `create` and `commit` never leaves a
//! partial instance behind.

use crate::cancel::CancelToken;
use crate::codec::ValueCodec;
use crate::descriptor::{Descriptor, decode_record, encode_record};
use crate::diagnostics::{CacheEvent, Diagnostics};
use crate::lazy::{LazySequence, LoadingStrategy};
use crate::payload::{Cached, EntryProducer};
use crate::root::CacheRoot;
use crate::store::{SequenceStore, SequenceWriter};
use crate::{Error, Result};
use chrono::Local;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File holding the serialized descriptor record
pub const DESCRIPTOR_FILENAME: &str = "config.yaml";
/// File holding a single payload
pub const SINGLE_PAYLOAD_FILENAME: &str = "single-cache.bin";
/// File holding a sequence payload
pub const SEQUENCE_PAYLOAD_FILENAME: &str = "iterable-cache.store";
/// File holding the last-usage timestamp
pub const LAST_USAGE_FILENAME: &str = ".last-usage";

/// Shape of a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// One opaque value
    Single,
    /// Ordered entries `0..N`
    Sequence,
}

/// Handle on an instance directory inside a cache root.
///
/// The directory may or may not be committed; see [`CacheInstance::is_committed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInstance {
    id: String,
    path: PathBuf,
}

impl CacheInstance {
    /// Handle for an existing directory. `None` if the name is not UTF-8.
    pub(crate) fn from_path(path: PathBuf) -> Option<Self> {
        let id = path.file_name()?.to_str()?.to_string();
        Some(Self { id, path })
    }

    /// Instance id (the directory name)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instance directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the descriptor record has been written
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.path.join(DESCRIPTOR_FILENAME).is_file()
    }

    /// Kind of the payload present on disk, if any
    #[must_use]
    pub fn payload_kind(&self) -> Option<PayloadKind> {
        if self.path.join(SEQUENCE_PAYLOAD_FILENAME).is_file() {
            Some(PayloadKind::Sequence)
        } else if self.path.join(SINGLE_PAYLOAD_FILENAME).is_file() {
            Some(PayloadKind::Single)
        } else {
            None
        }
    }

    /// Decode the stored descriptor record.
    pub fn descriptor<D: Descriptor>(&self) -> Result<D> {
        let path = self.path.join(DESCRIPTOR_FILENAME);
        let text = fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
        decode_record(&text)
    }

    /// Timestamp from the last-usage marker.
    ///
    /// `Ok(None)` when no marker exists; an error when it exists but cannot be
    /// read or parsed.
    pub fn usage_marker(&self) -> Result<Option<SystemTime>> {
        let path = self.path.join(LAST_USAGE_FILENAME);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
        parse_usage_marker(&text).map(Some).ok_or_else(|| {
            Error::serialization(format!(
                "invalid last-usage marker '{}'",
                text.trim()
            ))
        })
    }

    /// Modification time of the instance directory
    pub fn modified_at(&self) -> Result<SystemTime> {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::io(e, &self.path, "metadata"))
    }

    /// Last usage, falling back to the directory modification time when the
    /// marker is missing or unreadable.
    #[must_use]
    pub fn last_used_at(&self) -> Option<SystemTime> {
        match self.usage_marker() {
            Ok(Some(at)) => Some(at),
            _ => self.modified_at().ok(),
        }
    }

    /// Total size of all files in the instance directory
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        directory_size(&self.path)
    }

    /// Record a read. Never moves the marker backwards.
    pub(crate) fn touch(&self) -> Result<()> {
        let now = nanos_since_epoch(SystemTime::now());
        let previous = self
            .usage_marker()
            .ok()
            .flatten()
            .map(nanos_since_epoch);
        let stamp = previous.map_or(now, |prev| now.max(prev + 1));
        let path = self.path.join(LAST_USAGE_FILENAME);
        fs::write(&path, stamp.to_string()).map_err(|e| Error::io(e, &path, "write"))
    }

    /// Delete the instance directory
    pub fn remove(&self) -> Result<()> {
        fs::remove_dir_all(&self.path).map_err(|e| Error::io(e, &self.path, "remove_dir_all"))
    }
}

/// Removes the instance directory on drop unless disarmed.
#[derive(Debug)]
struct RollbackGuard {
    instance: CacheInstance,
    armed: bool,
}

impl RollbackGuard {
    fn rollback(&mut self) -> Result<()> {
        self.armed = false;
        self.instance.remove()
    }

    fn disarm(mut self) -> CacheInstance {
        self.armed = false;
        self.instance.clone()
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(instance = %self.instance.id(), "Removing intermediate results");
        if let Err(e) = self.instance.remove() {
            tracing::warn!(
                instance = %self.instance.id(),
                "Failed to remove uncommitted cache instance: {e}"
            );
        }
    }
}

/// Freshly allocated, empty instance. Dropping it deletes the directory.
#[derive(Debug)]
pub struct PendingInstance {
    guard: RollbackGuard,
}

impl PendingInstance {
    /// Instance id
    #[must_use]
    pub fn id(&self) -> &str {
        self.guard.instance.id()
    }

    /// Instance directory
    #[must_use]
    pub fn path(&self) -> &Path {
        self.guard.instance.path()
    }

    /// Store one value as the payload.
    pub fn write_single<T, C>(self, value: &T, codec: &C) -> Result<WrittenInstance>
    where
        C: ValueCodec<T>,
    {
        let bytes = codec.encode(value)?;
        let path = self.path().join(SINGLE_PAYLOAD_FILENAME);
        tracing::debug!(instance = %self.id(), bytes = bytes.len(), "Saving user data as single blob");
        fs::write(&path, bytes).map_err(|e| Error::io(e, &path, "write"))?;
        Ok(WrittenInstance {
            guard: self.guard,
            kind: PayloadKind::Single,
            entries: 1,
        })
    }

    /// Drain `entries` into the sequence store, indexed from 0.
    ///
    /// The producer is consumed and dropped before this returns, whatever the
    /// outcome. A producer error or a cancellation aborts the write.
    pub fn write_sequence<T, C>(
        self,
        entries: EntryProducer<'_, T>,
        codec: &C,
        cancel: &CancelToken,
    ) -> Result<WrittenInstance>
    where
        C: ValueCodec<T>,
    {
        let path = self.path().join(SEQUENCE_PAYLOAD_FILENAME);
        tracing::debug!(instance = %self.id(), "Saving iterable user data as sequence store");
        let mut writer = SequenceWriter::create(&path)?;
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    id: self.id().to_string(),
                });
            }
            let value = entry.map_err(|source| Error::Computation { source })?;
            writer.append(&codec.encode(&value)?)?;
        }
        let count = writer.finish()?;
        Ok(WrittenInstance {
            guard: self.guard,
            kind: PayloadKind::Sequence,
            entries: count,
        })
    }

    /// Delete the directory now.
    pub fn rollback(mut self) -> Result<()> {
        self.guard.rollback()
    }
}

/// Instance with its payload on disk but not yet visible to lookups.
/// Dropping it deletes the directory.
#[derive(Debug)]
pub struct WrittenInstance {
    guard: RollbackGuard,
    kind: PayloadKind,
    entries: u64,
}

impl WrittenInstance {
    /// Instance id
    #[must_use]
    pub fn id(&self) -> &str {
        self.guard.instance.id()
    }

    /// Kind of the written payload
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Number of entries written (1 for single payloads)
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Write the descriptor record, making the instance visible to lookups.
    ///
    /// The record goes to a temporary file first and is renamed into place,
    /// so `config.yaml` is either absent or complete.
    pub fn commit<D: Descriptor>(self, descriptor: &D) -> Result<CacheInstance> {
        let text = encode_record(descriptor)?;
        let dir = self.guard.instance.path();
        let path = dir.join(DESCRIPTOR_FILENAME);
        let tmp_path = dir.join(format!("{DESCRIPTOR_FILENAME}.tmp"));

        let mut file =
            fs::File::create(&tmp_path).map_err(|e| Error::io(e, &tmp_path, "create"))?;
        file.write_all(text.as_bytes())
            .map_err(|e| Error::io(e, &tmp_path, "write"))?;
        file.sync_all()
            .map_err(|e| Error::io(e, &tmp_path, "sync"))?;
        drop(file);
        fs::rename(&tmp_path, &path).map_err(|e| Error::io(e, &path, "rename"))?;
        Ok(self.guard.disarm())
    }

    /// Delete the directory now.
    pub fn rollback(mut self) -> Result<()> {
        self.guard.rollback()
    }
}

/// Allocate a new, empty, uncommitted instance.
///
/// `tag` must already be validated (see [`crate::config::normalize_tag_suffix`]).
pub fn create(root: &CacheRoot, tag: Option<&str>) -> Result<PendingInstance> {
    create_with_id(root, generate_id(tag))
}

/// Allocate the instance directory `id`. An existing directory is never reused.
pub(crate) fn create_with_id(root: &CacheRoot, id: String) -> Result<PendingInstance> {
    let path = root.path().join(&id);
    if path.exists() {
        return Err(Error::Allocation { path });
    }
    fs::create_dir(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            Error::Allocation { path: path.clone() }
        } else {
            Error::io(e, &path, "create_dir")
        }
    })?;
    tracing::debug!(instance = %id, "Allocated cache instance directory");
    Ok(PendingInstance {
        guard: RollbackGuard {
            instance: CacheInstance { id, path },
            armed: true,
        },
    })
}

/// `<date>__<time>__<8 hex chars>__cache[__<tag>]`
fn generate_id(tag: Option<&str>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    let suffix = tag.map_or(String::new(), |t| format!("__{t}"));
    format!(
        "{}__{}__cache{}",
        Local::now().format("%Y-%m-%d__%H-%M-%S"),
        &random[..8],
        suffix
    )
}

/// First committed instance whose descriptor is compatible with `requested`.
///
/// Instances whose record cannot be read are reported and skipped.
pub fn lookup<D: Descriptor>(
    root: &CacheRoot,
    requested: &D,
    diagnostics: &dyn Diagnostics,
) -> Result<Option<CacheInstance>> {
    tracing::debug!(root = %root.path().display(), "Looking for a compatible cache instance");
    for instance in root.instances()? {
        if !instance.is_committed() {
            continue;
        }
        match instance.descriptor::<D>() {
            Ok(stored) => {
                if D::is_compatible(requested, &stored) {
                    return Ok(Some(instance));
                }
            }
            Err(e) => diagnostics.emit(CacheEvent::LookupSkipped {
                instance: instance.id().to_string(),
                reason: e.to_string(),
            }),
        }
    }
    tracing::debug!("Could not find any compatible cache instance");
    Ok(None)
}

/// Read an instance's payload according to `strategy`.
///
/// Updates the last-usage marker first; failing to do so is not an error.
pub fn read<T, C>(instance: &CacheInstance, strategy: LoadingStrategy, codec: C) -> Result<Cached<T, C>>
where
    T: Clone,
    C: ValueCodec<T>,
{
    tracing::debug!(instance = %instance.id(), "Loading cache instance");
    if let Err(e) = instance.touch() {
        tracing::debug!(instance = %instance.id(), "Couldn't write last-usage marker: {e}");
    }

    match instance.payload_kind() {
        Some(PayloadKind::Single) => {
            let path = instance.path().join(SINGLE_PAYLOAD_FILENAME);
            let bytes = fs::read(&path).map_err(|e| Error::io(e, &path, "read"))?;
            codec.decode(&bytes).map(Cached::Value)
        }
        Some(PayloadKind::Sequence) => {
            let path = instance.path().join(SEQUENCE_PAYLOAD_FILENAME);
            if strategy == LoadingStrategy::Eager {
                tracing::info!(instance = %instance.id(), "Loading sequence to memory");
                let mut store = SequenceStore::open(&path)?;
                let items = (0..store.len())
                    .map(|i| store.read(i).and_then(|bytes| codec.decode(&bytes)))
                    .collect::<Result<Vec<T>>>()?;
                Ok(Cached::Materialized(items))
            } else {
                LazySequence::open(&path, instance.id(), strategy, codec).map(Cached::Lazy)
            }
        }
        None => Err(Error::MissingPayload {
            path: instance.path().to_path_buf(),
        }),
    }
}

pub(crate) fn directory_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn nanos_since_epoch(at: SystemTime) -> u128 {
    at.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
}

/// Accepts integer nanoseconds, with or without a fractional part.
fn parse_usage_marker(text: &str) -> Option<SystemTime> {
    let integral = text.trim().split('.').next()?;
    let nanos: u128 = integral.parse().ok()?;
    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    let sub = u32::try_from(nanos % 1_000_000_000).ok()?;
    UNIX_EPOCH.checked_add(Duration::new(secs, sub))
}
