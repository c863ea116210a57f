//! Paged range cursor with scoped release

use super::{Entry, KeyRange, KvStore};
use crate::error::{LedgerError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts the range cursors a store currently has open.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    open: Arc<AtomicUsize>,
    opened_total: Arc<AtomicU64>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> u64 {
        self.opened_total.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An open, ordered enumeration of the entries in a [`KeyRange`].
///
/// Entries are fetched from the store one page at a time. The cursor is
/// released exactly once, by [`RangeCursor::close`] or when it is dropped,
/// so early returns and `?` never leak it.
pub struct RangeCursor<'s> {
    store: &'s dyn KvStore,
    range: KeyRange,
    page_size: usize,
    buffer: VecDeque<Entry>,
    last_key: Option<String>,
    exhausted: bool,
    released: bool,
}

impl<'s> RangeCursor<'s> {
    pub fn open(store: &'s dyn KvStore, range: KeyRange, page_size: usize) -> Self {
        store.cursors().acquire();
        Self {
            store,
            range,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last_key: None,
            exhausted: false,
            released: false,
        }
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn fill(&mut self) -> Result<()> {
        if self.released || self.exhausted || !self.buffer.is_empty() {
            return Ok(());
        }
        let page = self
            .store
            .read_page(&self.range, self.last_key.as_deref(), self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((key, _)) = page.last() {
            self.last_key = Some(key.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }

    pub fn has_next(&mut self) -> Result<bool> {
        self.fill()?;
        Ok(!self.buffer.is_empty())
    }

    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        self.fill()?;
        Ok(self.buffer.pop_front())
    }

    /// Restarts the enumeration from the beginning of the range.
    pub fn rewind(&mut self) -> Result<()> {
        if self.released {
            return Err(LedgerError::Store("range cursor already closed".to_string()));
        }
        self.buffer.clear();
        self.last_key = None;
        self.exhausted = false;
        Ok(())
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.buffer.clear();
            self.store.cursors().release();
        }
    }
}

impl Iterator for RangeCursor<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                // one error ends the enumeration
                self.exhausted = true;
                self.buffer.clear();
                Some(Err(e))
            }
        }
    }
}

impl Drop for RangeCursor<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
