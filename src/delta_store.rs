//! Delta store adapter
//!
//! Maps the accounting vocabulary onto a [`KvStore`]: base values live under
//! their plain name, deltas live under `varName~op~value~txID` composite keys
//! with a zero-length value, and a name's deltas are read back with a prefix
//! scan.

use crate::delta::{
    encode_sequence, DeltaRecord, KeyLayout, Magnitude, Sign, DELTA_INDEX, SEQUENCE_KEY_TYPE,
};
use crate::error::{LedgerError, Result};
use crate::store::{
    create_composite_key, decode_counter, partial_composite_range, split_composite_key,
    validate_simple_key, KvStore, RangeCursor, WriteBatch,
};
use tracing::{debug, warn};

const DEFAULT_PAGE_SIZE: usize = 128;

/// A delta to be appended.
#[derive(Debug, Clone, Copy)]
pub struct DeltaEntry<'a> {
    pub name: &'a str,
    pub sign: Sign,
    pub magnitude: &'a Magnitude,
    pub tx_id: &'a str,
}

pub struct DeltaStore<S: KvStore> {
    store: S,
    layout: KeyLayout,
    page_size: usize,
}

impl<S: KvStore> DeltaStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            layout: KeyLayout::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_layout(mut self, layout: KeyLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    pub fn read_base(&self, name: &str) -> Result<Vec<u8>> {
        validate_simple_key(name)?;
        self.store
            .get_state(name)?
            .ok_or_else(|| LedgerError::NotFound(format!("No base value recorded for {}", name)))
    }

    pub fn base_exists(&self, name: &str) -> Result<bool> {
        validate_simple_key(name)?;
        Ok(self.store.get_state(name)?.is_some())
    }

    pub fn write_base(&self, name: &str, value: &[u8]) -> Result<()> {
        validate_simple_key(name)?;
        self.store.put_state(name, value)
    }

    /// Writes several base values as one atomic batch.
    pub fn write_bases(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut batch = WriteBatch::new();
        for (name, value) in entries {
            validate_simple_key(name)?;
            batch.put(*name, value.to_vec());
        }
        self.store.apply_batch(&batch)
    }

    pub fn append_delta(&self, entry: DeltaEntry<'_>) -> Result<DeltaRecord> {
        let mut records = self.append_deltas(std::slice::from_ref(&entry))?;
        records
            .pop()
            .ok_or_else(|| LedgerError::Store("delta append produced no record".to_string()))
    }

    /// Appends every entry in one atomic batch; either all deltas are
    /// journaled or none are. Under [`KeyLayout::Sequenced`] the sequence
    /// numbers are reserved inside the same write section.
    pub fn append_deltas(&self, entries: &[DeltaEntry<'_>]) -> Result<Vec<DeltaRecord>> {
        match self.layout {
            KeyLayout::Legacy => {
                let (batch, records) = delta_batch(entries, None)?;
                self.store.apply_batch(&batch)?;
                Ok(records)
            }
            KeyLayout::Sequenced => {
                let mut records = Vec::new();
                let mut build = |last: u64| -> Result<(WriteBatch, u64)> {
                    let (batch, built) = delta_batch(entries, Some(last))?;
                    let next = last + built.len() as u64;
                    records = built;
                    Ok((batch, next))
                };
                self.store.apply_counted(&sequence_key()?, &mut build)?;
                Ok(records)
            }
        }
    }

    /// Last sequence number issued, or 0 if none has been.
    pub fn last_sequence(&self) -> Result<u64> {
        let key = sequence_key()?;
        decode_counter(&key, self.store.get_state(&key)?)
    }

    /// Opens a scan over every delta recorded for `name`, in key order.
    pub fn scan_deltas(&self, name: &str) -> Result<DeltaScan<'_>> {
        validate_simple_key(name)?;
        let range = partial_composite_range(DELTA_INDEX, &[name])?;
        debug!(name, "opening delta scan");
        Ok(DeltaScan {
            name: name.to_string(),
            cursor: RangeCursor::open(&self.store, range, self.page_size),
            consumed: 0,
            drained: false,
        })
    }
}

fn sequence_key() -> Result<String> {
    create_composite_key(SEQUENCE_KEY_TYPE, &[])
}

/// Keys for `entries`, numbered after `last_sequence` when one is given.
fn delta_batch(
    entries: &[DeltaEntry<'_>],
    last_sequence: Option<u64>,
) -> Result<(WriteBatch, Vec<DeltaRecord>)> {
    let mut batch = WriteBatch::new();
    let mut records = Vec::with_capacity(entries.len());
    let mut sequence = last_sequence;

    for entry in entries {
        validate_simple_key(entry.name)?;
        let next = sequence.map(|s| s + 1);
        sequence = next;

        let seq_text = next.map(encode_sequence);
        let mut attributes = vec![
            entry.name,
            entry.sign.symbol(),
            entry.magnitude.as_str(),
            entry.tx_id,
        ];
        if let Some(seq) = seq_text.as_deref() {
            attributes.push(seq);
        }
        let key = create_composite_key(DELTA_INDEX, &attributes)?;
        batch.put(key, Vec::new());

        debug!(
            name = entry.name,
            sign = entry.sign.symbol(),
            magnitude = entry.magnitude.as_str(),
            tx_id = entry.tx_id,
            sequence = ?next,
            "journaling delta"
        );
        records.push(DeltaRecord {
            name: entry.name.to_string(),
            sign: entry.sign,
            magnitude: entry.magnitude.clone(),
            tx_id: entry.tx_id.to_string(),
            sequence: next,
        });
    }

    Ok((batch, records))
}

/// Lazily decoded deltas for one name. Released when closed or dropped.
pub struct DeltaScan<'a> {
    name: String,
    cursor: RangeCursor<'a>,
    consumed: usize,
    drained: bool,
}

impl DeltaScan<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_next(&mut self) -> Result<bool> {
        let more = self.cursor.has_next()?;
        if !more {
            self.drained = true;
        }
        Ok(more)
    }

    pub fn next_record(&mut self) -> Result<Option<DeltaRecord>> {
        match self.cursor.next_entry()? {
            None => {
                self.drained = true;
                Ok(None)
            }
            Some((key, _marker)) => {
                self.consumed += 1;
                self.decode(&key).map(Some)
            }
        }
    }

    fn decode(&self, key: &str) -> Result<DeltaRecord> {
        let (object_type, attributes) = split_composite_key(key)?;
        if object_type != DELTA_INDEX {
            return Err(LedgerError::Store(format!(
                "Unexpected key type {} in delta scan",
                object_type
            )));
        }
        let record = DeltaRecord::from_key_attributes(&attributes)?;
        if record.name != self.name {
            return Err(LedgerError::Store(format!(
                "Delta for {} found while scanning {}",
                record.name, self.name
            )));
        }
        Ok(record)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.consumed = 0;
        self.drained = false;
        self.cursor.rewind()
    }

    pub fn close(self) {}
}

impl Iterator for DeltaScan<'_> {
    type Item = Result<DeltaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl Drop for DeltaScan<'_> {
    fn drop(&mut self) {
        if !self.drained {
            warn!(
                name = %self.name,
                consumed = self.consumed,
                "delta scan released before it was drained"
            );
        }
    }
}
