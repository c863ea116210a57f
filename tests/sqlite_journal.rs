//! Integration tests for the journal on an on-disk SQLite database

use deltaledger::config::Config;
use deltaledger::delta::{format_amount, KeyLayout, Sign};
use deltaledger::engine::AccountingEngine;
use deltaledger::error::{LedgerError, Result as LedgerResult};
use deltaledger::operation::{Router, Status, TxContext};
use deltaledger::persistence::{InMemoryStore, SqliteStore};
use deltaledger::store::{CountedBuild, CursorTracker, Entry, KeyRange, KvStore, WriteBatch};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> String {
    dir.path().join("ledger.db").to_string_lossy().into_owned()
}

#[test]
fn test_journal_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);

    {
        let engine = AccountingEngine::new(SqliteStore::open(&path)?);
        engine.initialize("a", "100", "b", "200")?;
        engine.apply_transfer("a", "b", "10", "tx1")?;
        engine.apply_transfer("b", "a", "2.5", "tx2")?;
    }

    let engine = AccountingEngine::new(SqliteStore::open(&path)?);
    assert_eq!(format_amount(engine.compute_total("a")?), "92.5");
    assert_eq!(format_amount(engine.compute_total("b")?), "207.5");
    assert_eq!(engine.delta_store().last_sequence()?, 4);

    // Sequence numbers keep increasing across sessions
    engine.apply_transfer("a", "b", "1", "tx3")?;
    assert_eq!(engine.delta_store().last_sequence()?, 6);
    Ok(())
}

#[test]
fn test_small_pages_scan_every_delta() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let mut config = Config::default();
    config.database.path = db_path(&dir);
    config.journal.scan_page_size = 3;

    let engine = AccountingEngine::from_config(SqliteStore::open(&config.database.path)?, &config.journal);
    engine.initialize("a", "0", "b", "0")?;
    for i in 0..10 {
        engine.apply_transfer("a", "b", "1", &format!("tx{}", i))?;
    }

    assert_eq!(format_amount(engine.compute_total("a")?), "-10");
    assert_eq!(format_amount(engine.compute_total("b")?), "10");
    let history = engine.history("b")?;
    assert_eq!(history.len(), 10);
    assert!(history.iter().all(|r| r.sign == Sign::Increase));
    assert_eq!(engine.delta_store().store().cursors().open_count(), 0);
    Ok(())
}

#[test]
fn test_legacy_and_sequenced_keys_are_read_together() -> Result<(), Box<dyn std::error::Error>> {
    let store = InMemoryStore::new();

    let legacy = AccountingEngine::from_config(
        store.clone(),
        &deltaledger::config::JournalConfig {
            key_layout: KeyLayout::Legacy,
            scan_page_size: 8,
        },
    );
    legacy.initialize("a", "100", "b", "200")?;
    legacy.apply_transfer("a", "b", "10", "tx1")?;

    let sequenced = AccountingEngine::new(store);
    sequenced.apply_transfer("a", "b", "10", "tx1")?;

    assert_eq!(format_amount(sequenced.compute_total("a")?), "80");
    let history = sequenced.history("a")?;
    assert_eq!(history.iter().filter(|r| r.sequence.is_none()).count(), 1);
    assert_eq!(history.iter().filter(|r| r.sequence.is_some()).count(), 1);
    Ok(())
}

/// Wraps a store and fails batches on demand.
struct FlakyStore {
    inner: InMemoryStore,
    fail_batches: AtomicBool,
}

impl KvStore for FlakyStore {
    fn get_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        self.inner.get_state(key)
    }

    fn put_state(&self, key: &str, value: &[u8]) -> LedgerResult<()> {
        self.inner.put_state(key, value)
    }

    fn apply_batch(&self, batch: &WriteBatch) -> LedgerResult<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(LedgerError::Store("disk full".to_string()));
        }
        self.inner.apply_batch(batch)
    }

    fn apply_counted(&self, counter_key: &str, build: &mut CountedBuild<'_>) -> LedgerResult<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(LedgerError::Store("disk full".to_string()));
        }
        self.inner.apply_counted(counter_key, build)
    }

    fn read_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Entry>> {
        self.inner.read_page(range, after, limit)
    }

    fn cursors(&self) -> &CursorTracker {
        self.inner.cursors()
    }
}

#[test]
fn test_failed_transfer_leaves_no_one_sided_delta() -> Result<(), Box<dyn std::error::Error>> {
    let inner = InMemoryStore::new();
    let engine = AccountingEngine::new(FlakyStore {
        inner: inner.clone(),
        fail_batches: AtomicBool::new(false),
    });
    engine.initialize("a", "100", "b", "200")?;
    engine.apply_transfer("a", "b", "10", "tx1")?;
    let entries_before = inner.len();

    engine
        .delta_store()
        .store()
        .fail_batches
        .store(true, Ordering::SeqCst);
    let err = engine.apply_transfer("a", "b", "25", "tx2").unwrap_err();
    assert!(matches!(err, LedgerError::Store(_)));

    engine
        .delta_store()
        .store()
        .fail_batches
        .store(false, Ordering::SeqCst);
    assert_eq!(inner.len(), entries_before);
    assert_eq!(engine.delta_store().last_sequence()?, 2);
    assert_eq!(format_amount(engine.compute_total("a")?), "90");
    assert_eq!(format_amount(engine.compute_total("b")?), "210");
    Ok(())
}

#[test]
fn test_engines_sharing_a_database_keep_every_delta() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let shared = Arc::new(SqliteStore::open(&db_path(&dir))?);
    let first = AccountingEngine::new(Arc::clone(&shared));
    let second = AccountingEngine::new(Arc::clone(&shared));
    first.initialize("a", "1000", "b", "0")?;

    std::thread::scope(|scope| {
        for engine in [&first, &second] {
            scope.spawn(move || {
                for _ in 0..25 {
                    engine
                        .apply_transfer("a", "b", "1", "same-tx")
                        .expect("transfer");
                }
            });
        }
    });

    assert_eq!(format_amount(first.compute_total("a")?), "950");
    assert_eq!(format_amount(second.compute_total("b")?), "50");
    assert_eq!(first.history("b")?.len(), 50);
    assert_eq!(first.delta_store().last_sequence()?, 100);
    Ok(())
}

#[test]
fn test_router_over_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let router = Router::new(AccountingEngine::new(SqliteStore::open(&db_path(&dir))?));

    let init = router.handle("init", &["alice", "50", "bob", "0"], &TxContext::generate());
    assert_eq!(init.status, Status::Ok);

    let transfer = router.handle("invoke", &["alice", "bob", "20"], &TxContext::generate());
    assert_eq!(transfer.status, Status::Ok, "{}", transfer.message);

    assert_eq!(router.handle("query", &["alice"], &TxContext::generate()).payload_text(), "30");
    assert_eq!(router.handle("query", &["bob"], &TxContext::generate()).payload_text(), "20");

    let missing = router.handle("put", &["carol", "1"], &TxContext::generate());
    assert_eq!(missing.status, Status::Error);

    let wrong_arity = router.handle("invoke", &["alice", "bob"], &TxContext::generate());
    assert_eq!(wrong_arity.status, Status::Error);
    assert!(wrong_arity.message.contains("Expecting 3"));
    Ok(())
}
