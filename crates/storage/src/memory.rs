use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crossbeam::channel::{self, Sender};

use coframe_core::{
    ids::DatasetId,
    record::{CellWrite, ChangeRecord},
    snapshot::SnapshotDocument,
    token::{SequenceToken, TokenClock},
};

use crate::error::StorageError;
use crate::traits::{ChangeFeed, ChangeStore};

/// In-memory change store. Datasets, logs, and subscriptions live behind
/// one mutex; every accepted append is fanned out to live feeds before
/// the lock is released, so feed order always matches commit order.
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

struct MemoryState {
    clock: TokenClock,
    datasets: HashMap<DatasetId, StoredDataset>,
}

struct StoredDataset {
    document: SnapshotDocument,
    log: Vec<ChangeRecord>,
    subscribers: Vec<Sender<ChangeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                clock: TokenClock::new(),
                datasets: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Number of live feeds on a dataset. Dead feeds are only pruned on
    /// append, so the count may lag behind drops.
    pub fn subscriber_count(&self, dataset_id: DatasetId) -> Result<usize, StorageError> {
        let state = self.lock()?;
        let dataset = state
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_id.to_string()))?;
        Ok(dataset.subscribers.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeStore for MemoryStore {
    fn publish_dataset(&self, document: &SnapshotDocument) -> Result<DatasetId, StorageError> {
        let mut state = self.lock()?;
        let token = state.clock.tick()?;
        let dataset_id = DatasetId::mint(token);
        state.datasets.insert(
            dataset_id,
            StoredDataset {
                document: document.clone(),
                log: Vec::new(),
                subscribers: Vec::new(),
            },
        );
        Ok(dataset_id)
    }

    fn load_dataset(&self, dataset_id: DatasetId) -> Result<SnapshotDocument, StorageError> {
        let state = self.lock()?;
        state
            .datasets
            .get(&dataset_id)
            .map(|dataset| dataset.document.clone())
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_id.to_string()))
    }

    fn append(
        &self,
        dataset_id: DatasetId,
        write: CellWrite,
    ) -> Result<SequenceToken, StorageError> {
        let mut state = self.lock()?;
        let MemoryState { clock, datasets } = &mut *state;
        let dataset = datasets
            .get_mut(&dataset_id)
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_id.to_string()))?;
        let token = clock.tick()?;
        let record = ChangeRecord::from_write(dataset_id, write, token);
        dataset.log.push(record.clone());
        // Feeds are unbounded, so a send only fails when the receiver is
        // gone; those endpoints are dropped here.
        dataset
            .subscribers
            .retain(|sender| sender.send(record.clone()).is_ok());
        Ok(token)
    }

    fn subscribe(
        &self,
        dataset_id: DatasetId,
        from: SequenceToken,
    ) -> Result<ChangeFeed, StorageError> {
        let mut state = self.lock()?;
        let dataset = state
            .datasets
            .get_mut(&dataset_id)
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_id.to_string()))?;
        let (sender, receiver) = channel::unbounded();
        for record in dataset.log.iter().filter(|record| record.token >= from) {
            // The receiver is alive in this scope, so the send cannot fail.
            let _ = sender.send(record.clone());
        }
        dataset.subscribers.push(sender);
        Ok(ChangeFeed::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coframe_core::{AuthorId, CellValue, Table};
    use std::time::Duration;

    fn sample_document() -> SnapshotDocument {
        let table = Table::new(vec![1, 2], vec!["a".to_string(), "b".to_string()]).unwrap();
        SnapshotDocument::new(table)
    }

    fn write(row: i64, column: &str, author: &str, value: i64) -> CellWrite {
        CellWrite::new(row, column, AuthorId::new(author), CellValue::Integer(value))
    }

    #[test]
    fn publish_then_load_roundtrips() {
        let store = MemoryStore::new();
        let document = sample_document();
        let dataset_id = store.publish_dataset(&document).unwrap();
        let loaded = store.load_dataset(dataset_id).unwrap();
        assert_eq!(loaded.table, document.table);
    }

    #[test]
    fn unknown_dataset_is_an_error() {
        let store = MemoryStore::new();
        let token = TokenClock::new().tick().unwrap();
        let missing = DatasetId::mint(token);
        assert!(matches!(
            store.load_dataset(missing),
            Err(StorageError::DatasetNotFound(_))
        ));
        assert!(matches!(
            store.append(missing, write(1, "a", "alice", 1)),
            Err(StorageError::DatasetNotFound(_))
        ));
        assert!(matches!(
            store.subscribe(missing, token),
            Err(StorageError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn appends_commit_under_increasing_tokens() {
        let store = MemoryStore::new();
        let dataset_id = store.publish_dataset(&sample_document()).unwrap();
        let first = store.append(dataset_id, write(1, "a", "alice", 1)).unwrap();
        let second = store.append(dataset_id, write(1, "a", "alice", 2)).unwrap();
        let third = store.append(dataset_id, write(2, "b", "bob", 3)).unwrap();
        assert!(first < second);
        assert!(second < third);
        assert!(first > dataset_id.creation_token());
    }

    #[test]
    fn subscribe_replays_from_token_inclusive() {
        let store = MemoryStore::new();
        let dataset_id = store.publish_dataset(&sample_document()).unwrap();
        store.append(dataset_id, write(1, "a", "alice", 1)).unwrap();
        let second = store.append(dataset_id, write(1, "b", "alice", 2)).unwrap();
        store.append(dataset_id, write(2, "a", "bob", 3)).unwrap();

        let feed = store.subscribe(dataset_id, second).unwrap();
        let replayed = feed.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(replayed.token, second);
        assert_eq!(replayed.new_value, CellValue::Integer(2));
        let next = feed.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(next.new_value, CellValue::Integer(3));
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn subscribe_from_creation_token_sees_everything() {
        let store = MemoryStore::new();
        let dataset_id = store.publish_dataset(&sample_document()).unwrap();
        store.append(dataset_id, write(1, "a", "alice", 1)).unwrap();
        store.append(dataset_id, write(2, "b", "bob", 2)).unwrap();

        let feed = store
            .subscribe(dataset_id, dataset_id.creation_token())
            .unwrap();
        let mut seen = Vec::new();
        while let Ok(record) = feed.try_recv() {
            seen.push(record.new_value);
        }
        assert_eq!(seen, vec![CellValue::Integer(1), CellValue::Integer(2)]);
    }

    #[test]
    fn live_records_flow_after_backlog() {
        let store = MemoryStore::new();
        let dataset_id = store.publish_dataset(&sample_document()).unwrap();
        let feed = store
            .subscribe(dataset_id, dataset_id.creation_token())
            .unwrap();
        assert!(feed.try_recv().is_err());

        let token = store.append(dataset_id, write(1, "a", "alice", 7)).unwrap();
        let record = feed.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(record.token, token);
        assert_eq!(record.row, 1);
        assert_eq!(record.author_id.as_str(), "alice");
    }

    #[test]
    fn dropped_feeds_are_pruned_on_append() {
        let store = MemoryStore::new();
        let dataset_id = store.publish_dataset(&sample_document()).unwrap();
        let feed = store
            .subscribe(dataset_id, dataset_id.creation_token())
            .unwrap();
        assert_eq!(store.subscriber_count(dataset_id).unwrap(), 1);

        drop(feed);
        store.append(dataset_id, write(1, "a", "alice", 1)).unwrap();
        assert_eq!(store.subscriber_count(dataset_id).unwrap(), 0);
    }

    #[test]
    fn feeds_on_other_datasets_stay_quiet() {
        let store = MemoryStore::new();
        let first = store.publish_dataset(&sample_document()).unwrap();
        let second = store.publish_dataset(&sample_document()).unwrap();
        let feed = store.subscribe(second, second.creation_token()).unwrap();

        store.append(first, write(1, "a", "alice", 1)).unwrap();
        assert!(feed.try_recv().is_err());
    }
}
