//! Accounting engine
//!
//! Application-level operations over the delta journal. The engine keeps no
//! state between calls; every operation is a single request against the
//! store.

use crate::config::JournalConfig;
use crate::delta::{parse_amount, Amount, DeltaRecord, Magnitude, Sign, Tally};
use crate::delta_store::{DeltaEntry, DeltaStore};
use crate::error::{LedgerError, Result};
use crate::store::KvStore;
use tracing::{debug, info};

pub struct AccountingEngine<S: KvStore> {
    deltas: DeltaStore<S>,
}

impl<S: KvStore> AccountingEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_delta_store(DeltaStore::new(store))
    }

    pub fn with_delta_store(deltas: DeltaStore<S>) -> Self {
        Self { deltas }
    }

    pub fn from_config(store: S, config: &JournalConfig) -> Self {
        Self::with_delta_store(
            DeltaStore::new(store)
                .with_layout(config.key_layout)
                .with_page_size(config.scan_page_size),
        )
    }

    pub fn delta_store(&self) -> &DeltaStore<S> {
        &self.deltas
    }

    /// Writes the base values of two names. Calling it again overwrites them.
    pub fn initialize(
        &self,
        name_a: &str,
        magnitude_a: &str,
        name_b: &str,
        magnitude_b: &str,
    ) -> Result<()> {
        let value_a = parse_holding(magnitude_a)?;
        let value_b = parse_holding(magnitude_b)?;

        let text_a = value_a.to_string();
        let text_b = value_b.to_string();
        self.deltas
            .write_bases(&[(name_a, text_a.as_bytes()), (name_b, text_b.as_bytes())])?;

        info!("Initialized {} = {}, {} = {}", name_a, value_a, name_b, value_b);
        Ok(())
    }

    /// Journals a decrease on `from` and a matching increase on `to`, both
    /// tagged with `tx_id`, in a single atomic batch.
    pub fn apply_transfer(
        &self,
        from: &str,
        to: &str,
        magnitude_text: &str,
        tx_id: &str,
    ) -> Result<String> {
        let magnitude = Magnitude::parse(magnitude_text)?;
        if tx_id.is_empty() {
            return Err(LedgerError::Validation(
                "transaction id must not be empty".to_string(),
            ));
        }

        self.deltas.append_deltas(&[
            DeltaEntry {
                name: from,
                sign: Sign::Decrease,
                magnitude: &magnitude,
                tx_id,
            },
            DeltaEntry {
                name: to,
                sign: Sign::Increase,
                magnitude: &magnitude,
                tx_id,
            },
        ])?;

        info!(tx_id, "Transferred {} from {} to {}", magnitude, from, to);
        Ok(format!("Transferred {} from {} to {}", magnitude, from, to))
    }

    /// Folds every recorded delta for `name` into its base value.
    ///
    /// A name with no deltas is reported as unknown even when a base value
    /// exists for it.
    pub fn compute_total(&self, name: &str) -> Result<Amount> {
        let mut scan = self.deltas.scan_deltas(name)?;
        if !scan.has_next()? {
            return Err(LedgerError::NotFound(format!(
                "No variable by the name {} exists",
                name
            )));
        }

        let base = self.deltas.read_base(name)?;
        let base_text = String::from_utf8_lossy(&base);
        let base = parse_amount(&base_text).map_err(|_| {
            LedgerError::Validation(format!(
                "Base value of {} was not a number: {}",
                name, base_text
            ))
        })?;

        let mut tally = Tally::new(base);
        let mut applied = 0usize;
        for record in scan.by_ref() {
            let record = record?;
            tally.apply(record.sign, record.magnitude.value());
            applied += 1;
        }
        scan.close();

        let total = tally.finish()?;
        debug!(name, applied, "computed total");
        Ok(total)
    }

    /// Overwrites an existing base value verbatim, bypassing the journal.
    pub fn raw_put(&self, name: &str, value_text: &str) -> Result<()> {
        if !self.deltas.base_exists(name)? {
            return Err(LedgerError::NotFound(format!(
                "Failed to retrieve the state of {}: no such entry",
                name
            )));
        }
        self.deltas.write_base(name, value_text.as_bytes())
    }

    pub fn raw_get(&self, name: &str) -> Result<Vec<u8>> {
        self.deltas.read_base(name)
    }

    /// Every delta recorded for `name`, in storage order.
    pub fn history(&self, name: &str) -> Result<Vec<DeltaRecord>> {
        let records = self
            .deltas
            .scan_deltas(name)?
            .collect::<Result<Vec<DeltaRecord>>>()?;
        if records.is_empty() {
            return Err(LedgerError::NotFound(format!(
                "No variable by the name {} exists",
                name
            )));
        }
        Ok(records)
    }
}

fn parse_holding(text: &str) -> Result<i64> {
    text.parse::<i64>().map_err(|_| {
        LedgerError::Validation(format!(
            "Expecting integer value for asset holding, got {}",
            text
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{format_amount, KeyLayout};
    use crate::persistence::InMemoryStore;

    fn engine() -> AccountingEngine<InMemoryStore> {
        AccountingEngine::new(InMemoryStore::new())
    }

    #[test]
    fn test_transfer_scenario() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        let message = engine.apply_transfer("a", "b", "10", "tx1").unwrap();
        assert_eq!(message, "Transferred 10 from a to b");

        assert_eq!(engine.compute_total("a").unwrap(), Amount::from_num(90));
        assert_eq!(engine.compute_total("b").unwrap(), Amount::from_num(210));
    }

    #[test]
    fn test_initialize_stores_canonical_integers() {
        let engine = engine();
        engine.initialize("a", "007", "b", "-3").unwrap();
        assert_eq!(engine.raw_get("a").unwrap(), b"7".to_vec());
        assert_eq!(engine.raw_get("b").unwrap(), b"-3".to_vec());
    }

    #[test]
    fn test_initialize_rejects_non_integers() {
        let engine = engine();
        let err = engine.initialize("a", "1.5", "b", "2").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(engine.raw_get("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_reinitialize_overwrites_base() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        engine.initialize("a", "5", "b", "6").unwrap();
        assert_eq!(engine.raw_get("a").unwrap(), b"5".to_vec());
    }

    #[test]
    fn test_total_without_deltas_is_not_found() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        let err = engine.compute_total("a").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(engine.delta_store().store().cursors().open_count(), 0);
    }

    #[test]
    fn test_total_with_deltas_but_no_base_is_not_found() {
        let engine = engine();
        engine.apply_transfer("x", "y", "1", "tx1").unwrap();
        assert!(engine.compute_total("x").unwrap_err().is_not_found());
        assert_eq!(engine.delta_store().store().cursors().open_count(), 0);
    }

    #[test]
    fn test_non_numeric_base_fails_validation_and_releases_scan() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        engine.apply_transfer("a", "b", "1", "tx1").unwrap();
        engine.raw_put("a", "lots").unwrap();

        let err = engine.compute_total("a").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(engine.delta_store().store().cursors().open_count(), 0);
    }

    #[test]
    fn test_invalid_magnitude_appends_nothing() {
        let store = InMemoryStore::new();
        let engine = AccountingEngine::new(store.clone());
        engine.initialize("a", "100", "b", "200").unwrap();
        let before = store.len();

        let err = engine.apply_transfer("a", "b", "ten", "tx1").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(store.len(), before);
    }

    #[test]
    fn test_raw_put_requires_existing_entry() {
        let engine = engine();
        assert!(engine.raw_put("ghost", "1").unwrap_err().is_not_found());

        engine.initialize("a", "100", "b", "200").unwrap();
        engine.apply_transfer("a", "b", "10", "tx1").unwrap();
        engine.raw_put("a", "hello").unwrap();
        assert_eq!(engine.raw_get("a").unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_fractional_transfers() {
        let engine = engine();
        engine.initialize("a", "1", "b", "0").unwrap();
        engine.apply_transfer("a", "b", "0.25", "tx1").unwrap();
        engine.apply_transfer("a", "b", "0.25", "tx2").unwrap();
        assert_eq!(format_amount(engine.compute_total("a").unwrap()), "0.5");
        assert_eq!(format_amount(engine.compute_total("b").unwrap()), "0.5");
    }

    #[test]
    fn test_total_may_pass_through_out_of_range_values() {
        let engine = engine();
        engine
            .initialize("a", "9000000000000000000", "b", "0")
            .unwrap();
        // Increases sort before decreases, so the fold visits a + 5e17 first
        engine
            .apply_transfer("b", "a", "500000000000000000", "tx1")
            .unwrap();
        engine
            .apply_transfer("a", "b", "500000000000000000", "tx2")
            .unwrap();

        let total = engine.compute_total("a").unwrap();
        assert_eq!(format_amount(total), "9000000000000000000");
        assert_eq!(engine.compute_total("b").unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_total_out_of_range_is_validation_failure() {
        let engine = engine();
        engine
            .initialize("a", "9000000000000000000", "b", "0")
            .unwrap();
        engine
            .apply_transfer("b", "a", "500000000000000000", "tx1")
            .unwrap();
        let err = engine.compute_total("a").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(engine.delta_store().store().cursors().open_count(), 0);
    }

    #[test]
    fn test_negative_transfer_moves_value_backwards() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        let message = engine.apply_transfer("a", "b", "-5", "tx1").unwrap();
        assert_eq!(message, "Transferred -5 from a to b");
        assert_eq!(engine.compute_total("a").unwrap(), Amount::from_num(105));
        assert_eq!(engine.compute_total("b").unwrap(), Amount::from_num(195));
    }

    #[test]
    fn test_large_magnitude_is_exact() {
        let engine = engine();
        engine.initialize("a", "0", "b", "0").unwrap();
        engine
            .apply_transfer("a", "b", "9007199254740993", "tx1")
            .unwrap();
        assert_eq!(
            format_amount(engine.compute_total("b").unwrap()),
            "9007199254740993"
        );
        assert_eq!(
            engine.history("b").unwrap()[0].magnitude.as_str(),
            "9007199254740993"
        );
    }

    #[test]
    fn test_self_transfer_nets_to_zero() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        engine.apply_transfer("a", "a", "40", "tx1").unwrap();
        assert_eq!(engine.compute_total("a").unwrap(), Amount::from_num(100));
    }

    #[test]
    fn test_legacy_layout_collapses_repeated_transfer_in_same_tx() {
        let legacy = AccountingEngine::from_config(
            InMemoryStore::new(),
            &JournalConfig {
                key_layout: KeyLayout::Legacy,
                scan_page_size: 4,
            },
        );
        legacy.initialize("a", "100", "b", "200").unwrap();
        legacy.apply_transfer("a", "b", "10", "tx1").unwrap();
        legacy.apply_transfer("a", "b", "10", "tx1").unwrap();
        assert_eq!(legacy.compute_total("a").unwrap(), Amount::from_num(90));

        let sequenced = engine();
        sequenced.initialize("a", "100", "b", "200").unwrap();
        sequenced.apply_transfer("a", "b", "10", "tx1").unwrap();
        sequenced.apply_transfer("a", "b", "10", "tx1").unwrap();
        assert_eq!(sequenced.compute_total("a").unwrap(), Amount::from_num(80));
    }

    #[test]
    fn test_history_lists_deltas() {
        let engine = engine();
        engine.initialize("a", "100", "b", "200").unwrap();
        engine.apply_transfer("a", "b", "10", "tx1").unwrap();
        engine.apply_transfer("b", "a", "3", "tx2").unwrap();

        let history = engine.history("a").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|r| r.sign == Sign::Decrease && r.tx_id == "tx1"));
        assert!(history.iter().any(|r| r.sign == Sign::Increase && r.tx_id == "tx2"));
        assert!(engine.history("nobody").unwrap_err().is_not_found());
    }
}
