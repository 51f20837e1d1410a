use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use coframe_core::{
    ids::{AuthorId, DatasetId},
    record::{CellAddr, CellWrite},
    table::Table,
    value::CellValue,
};
use coframe_storage::ChangeStore;

use crate::error::{EngineError, permanent_failure};

/// Background half that ships local edits to the store.
///
/// Each cycle diffs the working copy against the baseline snapshot and
/// against the values already uploaded, then appends one cell write per
/// pending cell. A cell enters `uploaded` only after its append is
/// acknowledged, so an interrupted cycle retries the remainder next time
/// and the keyed apply downstream absorbs any double ship.
pub(crate) struct UploadPump {
    store: Arc<dyn ChangeStore>,
    dataset_id: DatasetId,
    author_id: AuthorId,
    baseline: Table,
    working: Arc<RwLock<Table>>,
    uploaded: HashMap<CellAddr, CellValue>,
    interval: Duration,
    max_consecutive_failures: u32,
    degraded: Arc<AtomicBool>,
    shutdown: Receiver<()>,
}

impl UploadPump {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn ChangeStore>,
        dataset_id: DatasetId,
        author_id: AuthorId,
        baseline: Table,
        working: Arc<RwLock<Table>>,
        interval: Duration,
        max_consecutive_failures: u32,
        degraded: Arc<AtomicBool>,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            store,
            dataset_id,
            author_id,
            baseline,
            working,
            uploaded: HashMap::new(),
            interval,
            max_consecutive_failures,
            degraded,
            shutdown,
        }
    }

    pub(crate) fn run(mut self) -> Result<(), EngineError> {
        tracing::info!(
            "upload pump started for {:?} as {}",
            self.dataset_id,
            self.author_id
        );
        let mut failures: u32 = 0;
        loop {
            // The interval wait doubles as the shutdown suspension point.
            match self.shutdown.recv_timeout(self.interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("upload pump stopping for {:?}", self.dataset_id);
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            match self.flush_pending() {
                Ok(shipped) => {
                    if shipped > 0 {
                        tracing::debug!("uploaded {shipped} cell write(s)");
                    }
                    failures = 0;
                    self.degraded.store(false, Ordering::Relaxed);
                }
                Err(err) if permanent_failure(&err) => {
                    tracing::error!("upload pump stopping: {err}");
                    return Err(err);
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!("upload cycle failed ({failures} consecutive): {err}");
                    if failures >= self.max_consecutive_failures {
                        self.degraded.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// One pump cycle. Returns how many cell writes were acknowledged; on
    /// error the unshipped remainder stays pending for the next cycle.
    fn flush_pending(&mut self) -> Result<usize, EngineError> {
        let pending = self.scan_pending()?;
        let mut shipped = 0;
        for (addr, value) in pending {
            let write = CellWrite::new(
                addr.row,
                addr.column.clone(),
                self.author_id.clone(),
                value.clone(),
            );
            self.store.append(self.dataset_id, write)?;
            self.uploaded.insert(addr, value);
            shipped += 1;
        }
        Ok(shipped)
    }

    /// Cells whose working value differs from both the baseline and the
    /// value last acknowledged for them.
    fn scan_pending(&self) -> Result<Vec<(CellAddr, CellValue)>, EngineError> {
        let working = self.working.read().map_err(|_| EngineError::LockPoisoned)?;
        let mut pending = Vec::new();
        for (row, column, value) in working.iter() {
            if let Ok(original) = self.baseline.get(row, column) {
                if original == value {
                    continue;
                }
            }
            let addr = CellAddr::new(row, column);
            if self.uploaded.get(&addr) == Some(value) {
                continue;
            }
            pending.push((addr, value.clone()));
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coframe_core::{snapshot::SnapshotDocument, token::SequenceToken};
    use coframe_storage::{ChangeFeed, MemoryStore, StorageError};
    use crossbeam::channel;
    use std::sync::Mutex;

    fn table() -> Table {
        Table::new(vec![1, 2], vec!["x".to_string(), "y".to_string()]).unwrap()
    }

    fn pump_over(store: Arc<dyn ChangeStore>, dataset_id: DatasetId) -> (UploadPump, Arc<RwLock<Table>>) {
        let working = Arc::new(RwLock::new(table()));
        let (_tx, rx) = channel::bounded(1);
        let pump = UploadPump::new(
            store,
            dataset_id,
            AuthorId::new("alice"),
            table(),
            Arc::clone(&working),
            Duration::from_millis(10),
            3,
            Arc::new(AtomicBool::new(false)),
            rx,
        );
        (pump, working)
    }

    #[test]
    fn unchanged_cells_are_never_pending() {
        let store = Arc::new(MemoryStore::new());
        let dataset_id = store.publish_dataset(&SnapshotDocument::new(table())).unwrap();
        let (pump, _working) = pump_over(store, dataset_id);
        assert!(pump.scan_pending().unwrap().is_empty());
    }

    #[test]
    fn edits_ship_once_and_only_reships_on_change() {
        let store = Arc::new(MemoryStore::new());
        let dataset_id = store.publish_dataset(&SnapshotDocument::new(table())).unwrap();
        let feed = store.subscribe(dataset_id, dataset_id.creation_token()).unwrap();
        let (mut pump, working) = pump_over(store, dataset_id);

        working
            .write()
            .unwrap()
            .set(1, "x", CellValue::Integer(5))
            .unwrap();
        assert_eq!(pump.flush_pending().unwrap(), 1);
        // Second cycle with no further edits ships nothing.
        assert_eq!(pump.flush_pending().unwrap(), 0);

        working
            .write()
            .unwrap()
            .set(1, "x", CellValue::Integer(6))
            .unwrap();
        assert_eq!(pump.flush_pending().unwrap(), 1);

        let values: Vec<_> = std::iter::from_fn(|| feed.try_recv().ok())
            .map(|record| record.new_value)
            .collect();
        assert_eq!(values, vec![CellValue::Integer(5), CellValue::Integer(6)]);
    }

    #[test]
    fn reverting_to_baseline_stops_shipping() {
        let store = Arc::new(MemoryStore::new());
        let dataset_id = store.publish_dataset(&SnapshotDocument::new(table())).unwrap();
        let (mut pump, working) = pump_over(store, dataset_id);

        working
            .write()
            .unwrap()
            .set(2, "y", CellValue::Boolean(true))
            .unwrap();
        assert_eq!(pump.flush_pending().unwrap(), 1);

        working.write().unwrap().set(2, "y", CellValue::Null).unwrap();
        assert_eq!(pump.flush_pending().unwrap(), 0);
    }

    /// Store whose appends fail a fixed number of times before recovering.
    struct FailingStore {
        inner: MemoryStore,
        failures_left: Mutex<u32>,
    }

    impl FailingStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures_left: Mutex::new(failures),
            }
        }
    }

    impl ChangeStore for FailingStore {
        fn publish_dataset(
            &self,
            document: &SnapshotDocument,
        ) -> Result<DatasetId, StorageError> {
            self.inner.publish_dataset(document)
        }

        fn load_dataset(&self, dataset_id: DatasetId) -> Result<SnapshotDocument, StorageError> {
            self.inner.load_dataset(dataset_id)
        }

        fn append(
            &self,
            dataset_id: DatasetId,
            write: CellWrite,
        ) -> Result<SequenceToken, StorageError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(StorageError::Unavailable("injected append failure".into()));
            }
            self.inner.append(dataset_id, write)
        }

        fn subscribe(
            &self,
            dataset_id: DatasetId,
            from: SequenceToken,
        ) -> Result<ChangeFeed, StorageError> {
            self.inner.subscribe(dataset_id, from)
        }
    }

    #[test]
    fn failed_append_stays_pending_and_retries() {
        let store = Arc::new(FailingStore::new(1));
        let dataset_id = store.publish_dataset(&SnapshotDocument::new(table())).unwrap();
        let feed = store.subscribe(dataset_id, dataset_id.creation_token()).unwrap();
        let (mut pump, working) = pump_over(Arc::clone(&store) as Arc<dyn ChangeStore>, dataset_id);

        working
            .write()
            .unwrap()
            .set(1, "y", CellValue::Text("v".into()))
            .unwrap();
        assert!(pump.flush_pending().is_err());
        assert!(feed.try_recv().is_err());

        // Next cycle retries the same cell and succeeds.
        assert_eq!(pump.flush_pending().unwrap(), 1);
        let record = feed.try_recv().unwrap();
        assert_eq!(record.new_value, CellValue::Text("v".into()));
    }
}
