//! Lazily loaded view over a sequence payload
//!
//! [`LazySequence`] gives list-like access (`len`, indexing with negative
//! indices, iteration) to the entries of a sequence store without loading
//! them all up front. Two retention modes exist:
//!
//! - [`LoadingStrategy::LazyDiscard`]: every access decodes from disk and
//!   nothing is retained. The store stays open until [`LazySequence::close`]
//!   or drop.
//! - [`LoadingStrategy::LazyKeep`]: the first access to an index decodes and
//!   retains the value. Once every index has been loaded the store is closed.
//!
//! [`LoadingStrategy::Eager`] never produces a `LazySequence`; reads with that
//! strategy return a plain `Vec`.

use crate::codec::{MsgPackCodec, ValueCodec};
use crate::store::SequenceStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How sequence payloads are brought into memory when read from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadingStrategy {
    /// Load each entry from disk on access and discard it afterwards.
    #[serde(rename = "lazy-load-discard")]
    LazyDiscard,
    /// Load entries on first access and keep them in memory.
    #[default]
    #[serde(rename = "lazy-load-keep")]
    LazyKeep,
    /// Load every entry before returning.
    #[serde(rename = "completely-load-to-memory")]
    Eager,
}

impl LoadingStrategy {
    /// Canonical name, as accepted by [`FromStr`] and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LazyDiscard => "lazy-load-discard",
            Self::LazyKeep => "lazy-load-keep",
            Self::Eager => "completely-load-to-memory",
        }
    }
}

impl fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lazy-load-discard" | "discard" => Ok(Self::LazyDiscard),
            "lazy-load-keep" | "keep" => Ok(Self::LazyKeep),
            "completely-load-to-memory" | "eager" => Ok(Self::Eager),
            other => Err(Error::configuration(format!(
                "Invalid loading strategy '{other}'"
            ))),
        }
    }
}

struct State<T> {
    store: Option<SequenceStore>,
    slots: Vec<Option<T>>,
    loaded: usize,
}

impl<T> State<T> {
    fn release(&mut self, instance: &str) {
        if let Some(store) = self.store.take() {
            tracing::debug!(
                instance = %instance,
                path = %store.path().display(),
                "Released sequence store"
            );
        }
    }
}

/// Read-only, index-addressable view over a cached sequence.
///
/// Accessors take `&self`; retained entries and the open store live behind a
/// `RefCell`, so a `LazySequence` is not `Sync`.
pub struct LazySequence<T, C = MsgPackCodec> {
    instance: String,
    path: PathBuf,
    len: usize,
    keep: bool,
    codec: C,
    state: RefCell<State<T>>,
}

impl<T, C> LazySequence<T, C>
where
    T: Clone,
    C: ValueCodec<T>,
{
    /// Open the store at `path`. `Eager` is treated as `LazyKeep`.
    pub(crate) fn open(
        path: &Path,
        instance: &str,
        strategy: LoadingStrategy,
        codec: C,
    ) -> Result<Self> {
        let store = SequenceStore::open(path)?;
        let len = store.len();
        let keep = strategy != LoadingStrategy::LazyDiscard;
        let mut state = State {
            store: Some(store),
            slots: if keep { vec_of_none(len) } else { Vec::new() },
            loaded: 0,
        };
        if keep && len == 0 {
            state.release(instance);
        }
        tracing::debug!(instance = %instance, len, keep, "Lazy-loading sequence");
        Ok(Self {
            instance: instance.to_string(),
            path: path.to_path_buf(),
            len,
            keep,
            codec,
            state: RefCell::new(state),
        })
    }

    /// Entry at `index`; negative values count from the end (`-1` is last).
    pub fn at(&self, index: isize) -> Result<T> {
        let idx = normalize_index(index, self.len)?;
        self.load(idx)
    }

    /// Entry at a non-negative position.
    pub fn get(&self, index: usize) -> Result<T> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index: isize::try_from(index).unwrap_or(isize::MAX),
                len: self.len,
            });
        }
        self.load(index)
    }

    /// Iterate entries in ascending index order.
    ///
    /// Each call starts over at index 0. Under `LazyKeep` all iterators share
    /// the retained entries.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T, C> {
        Iter {
            seq: self,
            next: 0,
        }
    }

    /// Decode every entry into a `Vec`.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    fn load(&self, idx: usize) -> Result<T> {
        let mut state = self.state.borrow_mut();
        if let Some(Some(value)) = state.slots.get(idx) {
            return Ok(value.clone());
        }
        let bytes = state
            .store
            .as_mut()
            .ok_or_else(|| Error::StoreReleased {
                path: self.path.clone(),
            })?
            .read(idx)?;
        let value = self.codec.decode(&bytes)?;
        if self.keep {
            state.slots[idx] = Some(value.clone());
            state.loaded += 1;
            if state.loaded == self.len {
                state.release(&self.instance);
            }
        }
        Ok(value)
    }
}

impl<T, C> LazySequence<T, C> {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the sequence holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Id of the cache instance this view reads from.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    /// The strategy this view was opened with.
    #[must_use]
    pub fn strategy(&self) -> LoadingStrategy {
        if self.keep {
            LoadingStrategy::LazyKeep
        } else {
            LoadingStrategy::LazyDiscard
        }
    }

    /// Number of entries currently retained in memory.
    #[must_use]
    pub fn loaded(&self) -> usize {
        self.state.borrow().loaded
    }

    /// Whether the backing store has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.borrow().store.is_none()
    }

    /// Release the backing store. Idempotent.
    ///
    /// Retained entries stay readable; anything else fails with
    /// [`Error::StoreReleased`] afterwards.
    pub fn close(&self) {
        self.state.borrow_mut().release(&self.instance);
    }
}

impl<T, C> Drop for LazySequence<T, C> {
    fn drop(&mut self) {
        self.state.get_mut().release(&self.instance);
    }
}

/// Elementwise equality. Decodes every entry of both sides, so it is as
/// expensive as reading both sequences completely. Read errors compare unequal.
impl<T, C> PartialEq for LazySequence<T, C>
where
    T: Clone + PartialEq,
    C: ValueCodec<T>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .iter()
                .zip(other.iter())
                .all(|pair| matches!(pair, (Ok(a), Ok(b)) if a == b))
    }
}

impl<T, C> fmt::Display for LazySequence<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.keep {
            write!(
                f,
                "[{} lazy objects, of which {} are held in RAM]",
                self.len,
                self.loaded()
            )
        } else {
            write!(f, "[{} lazy objects]", self.len)
        }
    }
}

impl<T, C> fmt::Debug for LazySequence<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySequence")
            .field("instance", &self.instance)
            .field("len", &self.len)
            .field("strategy", &self.strategy())
            .field("loaded", &self.loaded())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Iterator over a [`LazySequence`].
pub struct Iter<'a, T, C> {
    seq: &'a LazySequence<T, C>,
    next: usize,
}

impl<T, C> Iterator for Iter<'_, T, C>
where
    T: Clone,
    C: ValueCodec<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.seq.len {
            return None;
        }
        let item = self.seq.load(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.seq.len.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<T: Clone, C: ValueCodec<T>> ExactSizeIterator for Iter<'_, T, C> {}

impl<T: Clone, C: ValueCodec<T>> FusedIterator for Iter<'_, T, C> {}

impl<'a, T, C> IntoIterator for &'a LazySequence<T, C>
where
    T: Clone,
    C: ValueCodec<T>,
{
    type Item = Result<T>;
    type IntoIter = Iter<'a, T, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Map `index` in `[-len, len - 1]` onto `0..len`.
pub(crate) fn normalize_index(index: isize, len: usize) -> Result<usize> {
    let out_of_range = || Error::IndexOutOfRange { index, len };
    let signed_len = isize::try_from(len).map_err(|_| out_of_range())?;
    let resolved = if index < 0 { index + signed_len } else { index };
    if resolved < 0 || resolved >= signed_len {
        return Err(out_of_range());
    }
    usize::try_from(resolved).map_err(|_| out_of_range())
}

fn vec_of_none<T>(len: usize) -> Vec<Option<T>> {
    std::iter::repeat_with(|| None).take(len).collect()
}
