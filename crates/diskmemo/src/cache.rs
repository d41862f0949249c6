//! Lookup-or-compute orchestration

use crate::cancel::CancelToken;
use crate::codec::{MsgPackCodec, ValueCodec};
use crate::config::{CacheConfig, resolve_root};
use crate::descriptor::Descriptor;
use crate::diagnostics::{CacheEvent, Diagnostics, TracingDiagnostics};
use crate::error::BoxError;
use crate::eviction::{EvictionPolicy, EvictionReport};
use crate::instance::{self, CacheInstance, PendingInstance};
use crate::lazy::LoadingStrategy;
use crate::payload::{Cached, Computed};
use crate::root::{CacheRoot, InstanceInfo, RootStats};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Root name used by [`DiskCache::open`] when no root is configured
pub const DEFAULT_CACHE_NAME: &str = "default";

/// A disk-backed memoization cache over one root directory.
///
/// ```no_run
/// use diskmemo::{CacheConfig, Computed, Descriptor, DiskCache};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(PartialEq, Serialize, Deserialize)]
/// struct Render {
///     scene: String,
///     samples: u32,
/// }
///
/// impl Descriptor for Render {}
///
/// let cache = DiskCache::open(&CacheConfig::new().root("/tmp/renders").max_instance_count(16))?;
/// let request = Render { scene: "teapot".into(), samples: 64 };
/// let pixels = cache
///     .get_or_compute(&request, || Ok::<_, std::io::Error>(Computed::single(vec![0_u8; 16])))?
///     .into_value();
/// # Ok::<(), diskmemo::Error>(())
/// ```
pub struct DiskCache<C = MsgPackCodec> {
    root: CacheRoot,
    policy: EvictionPolicy,
    strategy: LoadingStrategy,
    tag: Option<String>,
    codec: C,
    cancel: CancelToken,
    diagnostics: Arc<dyn Diagnostics>,
}

impl DiskCache<MsgPackCodec> {
    /// Open a cache with the default name.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_named(DEFAULT_CACHE_NAME, config)
    }

    /// Open a cache; `name` picks the default root when none is configured.
    pub fn open_named(name: &str, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let path = match &config.root {
            Some(root) => root.clone(),
            None => resolve_root(name)?,
        };
        let root = CacheRoot::open(path)?;
        tracing::debug!(
            root = %root.path().display(),
            strategy = %config.loading_strategy,
            "Opened disk cache"
        );
        Ok(Self {
            root,
            policy: config.eviction_policy(),
            strategy: config.loading_strategy,
            tag: config.normalized_tag()?,
            codec: MsgPackCodec,
            cancel: CancelToken::new(),
            diagnostics: Arc::new(TracingDiagnostics),
        })
    }
}

impl<C> DiskCache<C> {
    /// Use a different value codec
    #[must_use]
    pub fn with_codec<C2>(self, codec: C2) -> DiskCache<C2> {
        DiskCache {
            root: self.root,
            policy: self.policy,
            strategy: self.strategy,
            tag: self.tag,
            codec,
            cancel: self.cancel,
            diagnostics: self.diagnostics,
        }
    }

    /// Send cache events to `diagnostics` instead of `tracing`
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Share a cancellation token with the host
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cache root
    #[must_use]
    pub const fn root(&self) -> &CacheRoot {
        &self.root
    }

    /// Configured limits
    #[must_use]
    pub const fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Default loading strategy
    #[must_use]
    pub const fn strategy(&self) -> LoadingStrategy {
        self.strategy
    }

    /// Token checked during computations
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Instance count and total size of the root
    pub fn root_stats(&self) -> Result<RootStats> {
        self.root.stats()
    }

    /// Delete every instance in the root
    pub fn clear_root(&self) -> Result<usize> {
        self.root.clear()
    }

    /// Inspection records for every instance
    pub fn instances(&self) -> Result<Vec<InstanceInfo>> {
        self.root.instance_infos()
    }

    /// Delete uncommitted instances older than `min_age`
    pub fn sweep_orphans(&self, min_age: Duration) -> Result<usize> {
        self.root.sweep_orphans(min_age, self.diagnostics.as_ref())
    }

    /// Apply the configured limits now, exempting nothing.
    pub fn enforce_limits(&self) -> Result<EvictionReport> {
        self.policy
            .enforce(&self.root, "", self.diagnostics.as_ref())
    }

    /// First committed instance compatible with `descriptor`
    pub fn lookup<D: Descriptor>(&self, descriptor: &D) -> Result<Option<CacheInstance>> {
        instance::lookup(&self.root, descriptor, self.diagnostics.as_ref())
    }

    fn check_cancelled(&self, id: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { id: id.to_string() });
        }
        Ok(())
    }

    fn evict(&self, exempt: &str) {
        if !self.policy.is_limited() {
            return;
        }
        match self
            .policy
            .enforce(&self.root, exempt, self.diagnostics.as_ref())
        {
            Ok(report) if !report.evicted.is_empty() => tracing::debug!(
                evicted = report.evicted.len(),
                instance_count = report.stats.instance_count,
                total_size_bytes = report.stats.total_size_bytes,
                "Eviction finished"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Eviction after commit failed: {e}"),
        }
    }
}

impl<C> DiskCache<C>
where
    C: Clone,
{
    /// Read a cached result without computing on a miss.
    pub fn get<D, T>(&self, descriptor: &D) -> Result<Option<Cached<T, C>>>
    where
        D: Descriptor,
        T: Clone,
        C: ValueCodec<T>,
    {
        match self.lookup(descriptor)? {
            Some(found) => instance::read(&found, self.strategy, self.codec.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Return the cached result for `descriptor`, computing and storing it
    /// first if no compatible instance exists.
    ///
    /// A failing or cancelled computation leaves the root unchanged and its
    /// error is returned as [`Error::Computation`] or [`Error::Cancelled`].
    pub fn get_or_compute<'f, D, T, F, E>(
        &self,
        descriptor: &D,
        compute: F,
    ) -> Result<Cached<T, C>>
    where
        D: Descriptor,
        T: Clone,
        C: ValueCodec<T>,
        F: FnOnce() -> std::result::Result<Computed<'f, T>, E>,
        E: Into<BoxError>,
    {
        self.get_or_compute_as(descriptor, self.strategy, compute)
    }

    /// [`DiskCache::get_or_compute`] with an explicit loading strategy.
    pub fn get_or_compute_as<'f, D, T, F, E>(
        &self,
        descriptor: &D,
        strategy: LoadingStrategy,
        compute: F,
    ) -> Result<Cached<T, C>>
    where
        D: Descriptor,
        T: Clone,
        C: ValueCodec<T>,
        F: FnOnce() -> std::result::Result<Computed<'f, T>, E>,
        E: Into<BoxError>,
    {
        if let Some(found) = self.lookup(descriptor)? {
            tracing::info!(instance = %found.id(), "Found cache instance");
            return instance::read(&found, strategy, self.codec.clone());
        }

        let created = self.materialize(descriptor, compute)?;
        self.evict(created.id());
        instance::read(&created, strategy, self.codec.clone())
    }

    fn materialize<'f, D, T, F, E>(&self, descriptor: &D, compute: F) -> Result<CacheInstance>
    where
        D: Descriptor,
        C: ValueCodec<T>,
        F: FnOnce() -> std::result::Result<Computed<'f, T>, E>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let pending = instance::create(&self.root, self.tag.as_deref())?;
        let id = pending.id().to_string();
        tracing::info!(instance = %id, "No compatible cache instance found, generating");

        match self.write_and_commit(pending, descriptor, compute) {
            Ok(created) => {
                tracing::info!(
                    instance = %id,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Cache instance committed"
                );
                Ok(created)
            }
            Err(e) => {
                self.diagnostics.emit(CacheEvent::RolledBack {
                    instance: id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Consumes `pending`; every early return drops it, removing the directory.
    fn write_and_commit<'f, D, T, F, E>(
        &self,
        pending: PendingInstance,
        descriptor: &D,
        compute: F,
    ) -> Result<CacheInstance>
    where
        D: Descriptor,
        C: ValueCodec<T>,
        F: FnOnce() -> std::result::Result<Computed<'f, T>, E>,
        E: Into<BoxError>,
    {
        self.check_cancelled(pending.id())?;
        let computed = compute().map_err(Error::computation)?;
        let written = match computed {
            Computed::Single(value) => pending.write_single(&value, &self.codec)?,
            Computed::Sequence(entries) => {
                pending.write_sequence(entries, &self.codec, &self.cancel)?
            }
        };
        self.check_cancelled(written.id())?;
        written.commit(descriptor)
    }
}

impl<C: fmt::Debug> fmt::Debug for DiskCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root.path())
            .field("policy", &self.policy)
            .field("strategy", &self.strategy)
            .field("tag", &self.tag)
            .field("codec", &self.codec)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
