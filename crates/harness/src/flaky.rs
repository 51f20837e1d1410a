use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use coframe_core::{
    ids::DatasetId, record::CellWrite, snapshot::SnapshotDocument, token::SequenceToken,
};
use coframe_storage::{ChangeFeed, ChangeStore, StorageError};
use crossbeam::channel;

const DELIVER_ALL: usize = usize::MAX;

/// Wraps a real store and injects transport faults on demand.
///
/// Appends can be made to fail a fixed number of times, and the next
/// subscription's feed can be cut after a fixed number of records. Both
/// faults present exactly as a flaky transport would: appends return
/// [`StorageError::Unavailable`], cut feeds simply disconnect.
pub struct FlakyStore {
    inner: Arc<dyn ChangeStore>,
    append_failures: AtomicU32,
    cut_next_feed_after: AtomicUsize,
}

impl FlakyStore {
    pub fn wrap(inner: Arc<dyn ChangeStore>) -> Self {
        Self {
            inner,
            append_failures: AtomicU32::new(0),
            cut_next_feed_after: AtomicUsize::new(DELIVER_ALL),
        }
    }

    /// The next `count` appends fail with a transient error.
    pub fn fail_appends(&self, count: u32) {
        self.append_failures.store(count, Ordering::SeqCst);
    }

    /// The next subscription's feed disconnects after delivering `records`.
    /// One-shot: subscriptions after that one behave normally.
    pub fn cut_next_feed_after(&self, records: usize) {
        self.cut_next_feed_after.store(records, Ordering::SeqCst);
    }
}

impl ChangeStore for FlakyStore {
    fn publish_dataset(&self, document: &SnapshotDocument) -> Result<DatasetId, StorageError> {
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
        let inject = self
            .append_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            });
        if inject.is_ok() {
            return Err(StorageError::Unavailable(
                "injected append failure".to_string(),
            ));
        }
        self.inner.append(dataset_id, write)
    }

    fn subscribe(
        &self,
        dataset_id: DatasetId,
        from: SequenceToken,
    ) -> Result<ChangeFeed, StorageError> {
        let feed = self.inner.subscribe(dataset_id, from)?;
        let budget = self.cut_next_feed_after.swap(DELIVER_ALL, Ordering::SeqCst);
        if budget == DELIVER_ALL {
            return Ok(feed);
        }

        // Relay the upstream feed and drop both ends once the budget is
        // spent, which the subscriber sees as a disconnect.
        let (sender, receiver) = channel::unbounded();
        thread::spawn(move || {
            let mut delivered = 0;
            while delivered < budget {
                match feed.recv() {
                    Ok(record) => {
                        if sender.send(record).is_err() {
                            return;
                        }
                        delivered += 1;
                    }
                    Err(_) => return,
                }
            }
        });
        Ok(ChangeFeed::new(receiver))
    }
}
