use std::sync::Arc;
use std::time::Duration;

use coframe_core::{AuthorId, CellValue, DatasetLocator, SnapshotDocument, Table};
use coframe_engine::{
    EngineError, MergeStrategy, Resolution, SessionConfig, SyncHandles, SyncSession,
};
use coframe_storage::ChangeStore;

/// A session configuration with short intervals so suites finish quickly.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        upload_interval: Duration::from_millis(20),
        retry_backoff: Duration::from_millis(10),
        max_retry_backoff: Duration::from_millis(80),
        max_consecutive_failures: 3,
        ..SessionConfig::default()
    }
}

/// One collaborator in a test: a live session plus its background tasks.
pub struct TestPeer {
    pub session: SyncSession,
    pub handles: SyncHandles,
}

impl TestPeer {
    /// Shares a fresh dataset on `store` and starts syncing.
    pub fn share(
        store: Arc<dyn ChangeStore>,
        author: &str,
        table: Table,
    ) -> Result<Self, EngineError> {
        let session = SyncSession::share(
            store,
            "hub.test",
            AuthorId::new(author),
            SnapshotDocument::new(table),
            test_config(),
        )?;
        let handles = session.start();
        Ok(Self { session, handles })
    }

    /// Joins an existing dataset and starts syncing.
    pub fn join(
        store: Arc<dyn ChangeStore>,
        locator: &DatasetLocator,
        author: &str,
    ) -> Result<Self, EngineError> {
        let session = SyncSession::join(store, locator, AuthorId::new(author), test_config())?;
        let handles = session.start();
        Ok(Self { session, handles })
    }

    /// Edits one cell of this peer's working copy.
    pub fn edit(&self, row: i64, column: &str, value: CellValue) -> Result<(), EngineError> {
        self.session.set_cell(row, column, value)
    }

    /// Resolves the dataset as this peer currently sees it.
    pub fn resolve(
        &self,
        quorum: usize,
        strategy: MergeStrategy,
    ) -> Result<Resolution, EngineError> {
        self.session.resolve(quorum, strategy)
    }

    /// Authors whose changes have reached this peer so far.
    pub fn seen_authors(&self) -> Result<Vec<AuthorId>, EngineError> {
        self.session.shadow_authors()
    }

    /// Stops both background tasks and surfaces any task failure.
    pub fn stop(self) -> Result<(), EngineError> {
        self.handles.shutdown()
    }
}
