//! Ordered key-value store contract
//!
//! Everything the accounting layer needs from a backing store:
//! - point reads and writes by key
//! - atomic multi-key batches
//! - paged, ordered reads over a key range, wrapped by [`RangeCursor`]
//! - composite keys that can be enumerated by prefix

mod composite;
mod cursor;

pub use composite::{
    create_composite_key, partial_composite_range, split_composite_key, validate_simple_key,
    COMPOSITE_KEY_NAMESPACE, MAX_UNICODE_RUNE,
};
pub use cursor::{CursorTracker, RangeCursor};

use crate::error::{LedgerError, Result};
use std::sync::Arc;

/// A key and the value stored under it.
pub type Entry = (String, Vec<u8>);

/// Half-open key interval `[start, end)` in byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && key < self.end.as_str()
    }
}

/// A set of puts applied all-or-nothing by [`KvStore::apply_batch`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    puts: Vec<Entry>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.puts.push((key.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.puts.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Builds the batch for [`KvStore::apply_counted`] from the current counter
/// value and returns it with the new counter value.
pub type CountedBuild<'a> = dyn FnMut(u64) -> Result<(WriteBatch, u64)> + 'a;

/// Decodes a counter stored as decimal text. A missing counter is 0.
pub fn decode_counter(key: &str, stored: Option<Vec<u8>>) -> Result<u64> {
    let bytes = match stored {
        Some(bytes) => bytes,
        None => return Ok(0),
    };
    let text = String::from_utf8(bytes)
        .map_err(|e| LedgerError::Store(format!("Corrupt counter {:?}: {}", key, e)))?;
    text.parse::<u64>()
        .map_err(|e| LedgerError::Store(format!("Corrupt counter {:?} = {}: {}", key, text, e)))
}

/// Abstraction for key-value backends. Implementations must apply batches
/// atomically and return pages in ascending byte order of the key.
pub trait KvStore: Send + Sync {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put_state(&self, key: &str, value: &[u8]) -> Result<()>;

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()>;

    /// Reads the counter at `counter_key`, hands it to `build` and applies
    /// the returned batch together with the new counter value, all inside
    /// one write section. Callers sharing the store never observe the same
    /// counter value. Nothing is written when `build` fails.
    fn apply_counted(&self, counter_key: &str, build: &mut CountedBuild<'_>) -> Result<()>;

    /// Up to `limit` entries inside `range` whose key is strictly greater
    /// than `after` (when given), in key order.
    fn read_page(&self, range: &KeyRange, after: Option<&str>, limit: usize)
        -> Result<Vec<Entry>>;

    fn cursors(&self) -> &CursorTracker;

    /// Opens a lazily paged cursor over `range`.
    fn open_range(&self, range: KeyRange, page_size: usize) -> RangeCursor<'_>
    where
        Self: Sized,
    {
        RangeCursor::open(self, range, page_size)
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get_state(key)
    }

    fn put_state(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put_state(key, value)
    }

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
        (**self).apply_batch(batch)
    }

    fn apply_counted(&self, counter_key: &str, build: &mut CountedBuild<'_>) -> Result<()> {
        (**self).apply_counted(counter_key, build)
    }

    fn read_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        (**self).read_page(range, after, limit)
    }

    fn cursors(&self) -> &CursorTracker {
        (**self).cursors()
    }
}
