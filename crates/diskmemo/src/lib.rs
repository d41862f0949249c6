//! Disk-backed memoization for expensive, deterministic computations
//!
//! A [`DiskCache`] maps request descriptors to results stored on disk. Asking
//! for a descriptor either returns a previously stored, compatible result or
//! runs the computation, persists its output and returns it.
//!
//! # Overview
//!
//! - Each result lives in its own instance directory under the cache root.
//!   The descriptor record is written last, so an instance is either fully
//!   visible or not visible at all.
//! - Failed, panicking or cancelled computations leave nothing behind.
//! - After every new instance, least recently used instances are evicted
//!   until the root fits its size and count limits.
//! - Sequence results are stored entry by entry and read back through a
//!   [`LazySequence`], or fully loaded with [`LoadingStrategy::Eager`].
//!
//! ```no_run
//! use diskmemo::{CacheConfig, Computed, Descriptor, DiskCache, LoadingStrategy};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(PartialEq, Serialize, Deserialize)]
//! struct Corpus {
//!     language: String,
//! }
//!
//! impl Descriptor for Corpus {}
//!
//! let cache = DiskCache::open(
//!     &CacheConfig::new()
//!         .max_total_size_mb(512.0)
//!         .loading_strategy(LoadingStrategy::LazyDiscard),
//! )?;
//! let words = cache
//!     .get_or_compute(&Corpus { language: "en".into() }, || {
//!         Ok::<_, std::io::Error>(Computed::sequence(["alpha", "beta"].map(String::from)))
//!     })?
//!     .into_lazy();
//! # Ok::<(), diskmemo::Error>(())
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

mod cache;
mod cancel;
mod codec;
pub mod config;
mod descriptor;
pub mod diagnostics;
mod error;
mod eviction;
pub mod instance;
mod lazy;
mod payload;
mod root;
mod store;

// Re-export error types at crate root
pub use error::{BoxError, Error, Result};

// Re-export main types
pub use cache::{DEFAULT_CACHE_NAME, DiskCache};
pub use cancel::CancelToken;
pub use codec::{JsonCodec, MsgPackCodec, ValueCodec};
pub use config::CacheConfig;
pub use descriptor::{Descriptor, Record};
pub use diagnostics::{CacheEvent, CollectedDiagnostics, Diagnostics, TracingDiagnostics};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use instance::{CacheInstance, PayloadKind};
pub use lazy::{Iter, LazySequence, LoadingStrategy};
pub use payload::{Cached, Computed, EntryProducer};
pub use root::{CacheRoot, InstanceInfo, RootStats};
