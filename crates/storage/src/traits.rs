use std::time::Duration;

use coframe_core::{
    ids::DatasetId,
    record::{CellWrite, ChangeRecord},
    snapshot::SnapshotDocument,
    token::SequenceToken,
};
use crossbeam::channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};

use crate::error::StorageError;

/// Live stream of committed change records for one dataset.
///
/// Records arrive in commit order. Dropping the feed cancels the
/// subscription; the store prunes the dead endpoint on its next append.
pub struct ChangeFeed {
    receiver: Receiver<ChangeRecord>,
}

impl ChangeFeed {
    pub fn new(receiver: Receiver<ChangeRecord>) -> Self {
        Self { receiver }
    }

    /// Blocks until the next record arrives or the store side disconnects.
    pub fn recv(&self) -> Result<ChangeRecord, RecvError> {
        self.receiver.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeRecord, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<ChangeRecord, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Raw channel endpoint, for multiplexing with `crossbeam::select!`.
    pub fn receiver(&self) -> &Receiver<ChangeRecord> {
        &self.receiver
    }
}

/// Shared change store: snapshot documents plus an append-only change
/// log per dataset.
///
/// The store assigns every appended record its committed [`SequenceToken`];
/// callers never pick tokens. `subscribe` replays the log from `from`
/// (inclusive) and then stays live. Delivery is at-least-once: a record
/// may be observed both in a replay and live, so consumers must apply
/// records idempotently.
pub trait ChangeStore: Send + Sync {
    /// Stores a snapshot document and mints the identifier under which
    /// changes to it will be logged.
    fn publish_dataset(&self, document: &SnapshotDocument) -> Result<DatasetId, StorageError>;

    /// Fetches the snapshot document a dataset was published with.
    fn load_dataset(&self, dataset_id: DatasetId) -> Result<SnapshotDocument, StorageError>;

    /// Commits one cell write to the dataset's change log and returns the
    /// token it was committed under. Once this returns `Ok`, the record is
    /// durable and will reach every subscriber.
    fn append(&self, dataset_id: DatasetId, write: CellWrite)
    -> Result<SequenceToken, StorageError>;

    /// Opens a feed over the dataset's change log starting at `from`
    /// (inclusive), then delivering new records as they commit.
    fn subscribe(
        &self,
        dataset_id: DatasetId,
        from: SequenceToken,
    ) -> Result<ChangeFeed, StorageError>;
}
