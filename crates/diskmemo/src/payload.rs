//! What computations hand to the cache, and what reads hand back

use crate::codec::MsgPackCodec;
use crate::error::BoxError;
use crate::lazy::LazySequence;

/// Producer of sequence entries; may fail per entry.
pub type EntryProducer<'a, T> = Box<dyn Iterator<Item = Result<T, BoxError>> + 'a>;

/// Result of a computation, as passed to the cache for persisting.
pub enum Computed<'a, T> {
    /// One opaque value, stored as a single blob.
    Single(T),
    /// An ordered, single-pass stream of values, stored entry by entry.
    Sequence(EntryProducer<'a, T>),
}

impl<'a, T: 'a> Computed<'a, T> {
    /// Wrap a single value.
    pub fn single(value: T) -> Self {
        Self::Single(value)
    }

    /// Wrap an infallible sequence (a `Vec`, a generator-like iterator, ...).
    pub fn sequence<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'a,
    {
        Self::Sequence(Box::new(items.into_iter().map(Ok::<T, BoxError>)))
    }

    /// Wrap a sequence whose entries can fail. The first error aborts the
    /// write and rolls back the instance.
    pub fn try_sequence<I, E>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<T, E>>,
        I::IntoIter: 'a,
        E: Into<BoxError> + 'a,
    {
        Self::Sequence(Box::new(items.into_iter().map(box_entry_error::<T, E>)))
    }
}

fn box_entry_error<T, E: Into<BoxError>>(entry: Result<T, E>) -> Result<T, BoxError> {
    entry.map_err(Into::into)
}

impl<'a, T: 'a> From<Vec<T>> for Computed<'a, T> {
    fn from(items: Vec<T>) -> Self {
        Self::sequence(items)
    }
}

impl<T> std::fmt::Debug for Computed<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Computed::Single(..)"),
            Self::Sequence(_) => f.write_str("Computed::Sequence(..)"),
        }
    }
}

/// A value read back from the cache.
#[derive(Debug)]
pub enum Cached<T, C = MsgPackCodec> {
    /// A single payload.
    Value(T),
    /// A sequence payload read with a lazy strategy.
    Lazy(LazySequence<T, C>),
    /// A sequence payload read with [`crate::LoadingStrategy::Eager`].
    Materialized(Vec<T>),
}

impl<T, C> Cached<T, C> {
    /// The single value, if this was a single payload.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The lazy view, if this was read lazily.
    pub fn into_lazy(self) -> Option<LazySequence<T, C>> {
        match self {
            Self::Lazy(seq) => Some(seq),
            _ => None,
        }
    }

    /// The fully loaded entries, if this was read eagerly.
    pub fn into_materialized(self) -> Option<Vec<T>> {
        match self {
            Self::Materialized(items) => Some(items),
            _ => None,
        }
    }

    /// Entry count for sequence payloads.
    #[must_use]
    pub fn sequence_len(&self) -> Option<usize> {
        match self {
            Self::Value(_) => None,
            Self::Lazy(seq) => Some(seq.len()),
            Self::Materialized(items) => Some(items.len()),
        }
    }
}
