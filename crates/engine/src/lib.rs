pub mod config;
pub mod error;
mod listener;
mod pump;
pub mod resolve;
pub mod shadow;
pub mod task;

pub use config::SessionConfig;
pub use error::EngineError;
pub use resolve::{MergeStrategy, NoQuorumCell, Resolution, ResolutionReport, TieCell};
pub use shadow::{ShadowCell, ShadowSet, ShadowTable};
pub use task::{SyncHandles, TaskHandle};

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam::channel;

use coframe_core::{
    ids::{AuthorId, DatasetId},
    locator::DatasetLocator,
    record::CellAddr,
    snapshot::SnapshotDocument,
    table::Table,
    value::CellValue,
};
use coframe_storage::ChangeStore;

use crate::listener::DownloadListener;
use crate::pump::UploadPump;

/// One author's attachment to a shared dataset: a private working copy,
/// per-author shadows of everyone's accepted edits, and the background
/// tasks that move data between the two and the store.
pub struct SyncSession {
    store: Arc<dyn ChangeStore>,
    dataset_id: DatasetId,
    locator: DatasetLocator,
    author_id: AuthorId,
    baseline: Table,
    working: Arc<RwLock<Table>>,
    shadows: Arc<RwLock<ShadowSet>>,
    config: SessionConfig,
}

impl SyncSession {
    /// Publishes a snapshot document to the store and attaches to the new
    /// dataset as `author_id`. The resulting locator names `host` under the
    /// configured scheme and can be handed to collaborators.
    pub fn share(
        store: Arc<dyn ChangeStore>,
        host: &str,
        author_id: AuthorId,
        document: SnapshotDocument,
        config: SessionConfig,
    ) -> Result<Self, EngineError> {
        let dataset_id = store.publish_dataset(&document)?;
        let locator = DatasetLocator::new(config.scheme.clone(), host, dataset_id);
        tracing::info!("shared dataset at {locator}");
        Ok(Self::attach(store, locator, document, author_id, config))
    }

    /// Attaches to an existing dataset by locator, loading its snapshot
    /// from the store. Edits begin from that baseline.
    pub fn join(
        store: Arc<dyn ChangeStore>,
        locator: &DatasetLocator,
        author_id: AuthorId,
        config: SessionConfig,
    ) -> Result<Self, EngineError> {
        let document = store.load_dataset(locator.dataset_id())?;
        tracing::info!("joined dataset at {locator}");
        Ok(Self::attach(store, locator.clone(), document, author_id, config))
    }

    fn attach(
        store: Arc<dyn ChangeStore>,
        locator: DatasetLocator,
        document: SnapshotDocument,
        author_id: AuthorId,
        config: SessionConfig,
    ) -> Self {
        let baseline = document.table;
        let working = Arc::new(RwLock::new(baseline.clone()));
        let shadows = Arc::new(RwLock::new(ShadowSet::new(config.max_shadow_authors)));
        Self {
            store,
            dataset_id: locator.dataset_id(),
            locator,
            author_id,
            baseline,
            working,
            shadows,
            config,
        }
    }

    // ========================================================================
    // Edit Path
    // ========================================================================

    /// Edits one cell of the private working copy. Labels must exist in the
    /// snapshot's label space. Nothing is uploaded until the pump's next
    /// cycle.
    pub fn set_cell(&self, row: i64, column: &str, value: CellValue) -> Result<(), EngineError> {
        let mut working = self.working.write().map_err(|_| EngineError::LockPoisoned)?;
        working.set(row, column, value)?;
        Ok(())
    }

    /// Current working-copy value of one cell.
    pub fn cell(&self, row: i64, column: &str) -> Result<CellValue, EngineError> {
        let working = self.working.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(working.get(row, column)?.clone())
    }

    /// Clone of the whole working copy.
    pub fn working_table(&self) -> Result<Table, EngineError> {
        let working = self.working.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(working.clone())
    }

    /// Cells where the working copy diverges from the baseline snapshot,
    /// with their current values. Upload state does not affect the listing.
    pub fn local_edits(&self) -> Result<Vec<(CellAddr, CellValue)>, EngineError> {
        let working = self.working.read().map_err(|_| EngineError::LockPoisoned)?;
        let mut edits = Vec::new();
        for (row, column, value) in working.iter() {
            if let Ok(original) = self.baseline.get(row, column) {
                if original == value {
                    continue;
                }
            }
            edits.push((CellAddr::new(row, column), value.clone()));
        }
        Ok(edits)
    }

    // ========================================================================
    // Background Tasks
    // ========================================================================

    /// Spawns the upload pump and download listener threads and returns
    /// their handles. Lifecycle belongs to the caller: stop the tasks via
    /// [`SyncHandles::shutdown`] (or each handle's `stop`), not by dropping
    /// the session.
    pub fn start(&self) -> SyncHandles {
        let (pump_shutdown, pump_signal) = channel::bounded(1);
        let pump_degraded = Arc::new(AtomicBool::new(false));
        let pump = UploadPump::new(
            Arc::clone(&self.store),
            self.dataset_id,
            self.author_id.clone(),
            self.baseline.clone(),
            Arc::clone(&self.working),
            self.config.upload_interval,
            self.config.max_consecutive_failures,
            Arc::clone(&pump_degraded),
            pump_signal,
        );
        let pump_join = thread::spawn(move || pump.run());

        let (listener_shutdown, listener_signal) = channel::bounded(1);
        let listener_degraded = Arc::new(AtomicBool::new(false));
        let listener = DownloadListener::new(
            Arc::clone(&self.store),
            self.dataset_id,
            Arc::clone(&self.shadows),
            self.config.retry_backoff,
            self.config.max_retry_backoff,
            self.config.max_consecutive_failures,
            Arc::clone(&listener_degraded),
            listener_signal,
        );
        let listener_join = thread::spawn(move || listener.run());

        SyncHandles {
            pump: TaskHandle::new(pump_shutdown, pump_join, pump_degraded),
            listener: TaskHandle::new(listener_shutdown, listener_join, listener_degraded),
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Runs the resolver over a point-in-time clone of the shadow set. The
    /// listener keeps folding new records while the caller inspects the
    /// result.
    pub fn resolve(
        &self,
        quorum: usize,
        strategy: MergeStrategy,
    ) -> Result<Resolution, EngineError> {
        let shadows = {
            let guard = self.shadows.read().map_err(|_| EngineError::LockPoisoned)?;
            guard.clone()
        };
        resolve::resolve(&self.baseline, &shadows, quorum, strategy)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    pub fn locator(&self) -> &DatasetLocator {
        &self.locator
    }

    pub fn author_id(&self) -> &AuthorId {
        &self.author_id
    }

    pub fn baseline(&self) -> &Table {
        &self.baseline
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Authors whose edits have reached this session's shadows so far.
    pub fn shadow_authors(&self) -> Result<Vec<AuthorId>, EngineError> {
        let shadows = self.shadows.read().map_err(|_| EngineError::LockPoisoned)?;
        let mut authors: Vec<AuthorId> = shadows.authors().cloned().collect();
        authors.sort();
        Ok(authors)
    }
}
