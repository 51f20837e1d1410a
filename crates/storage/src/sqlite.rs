use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crossbeam::channel::{self, Sender};
use rusqlite::Connection;

use coframe_core::{
    ids::{AuthorId, DatasetId},
    record::{CellWrite, ChangeRecord},
    snapshot::{self, SnapshotDocument},
    token::{SequenceToken, TokenClock},
    value::CellValue,
};

use crate::error::StorageError;
use crate::traits::{ChangeFeed, ChangeStore};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// SQLite-backed change store. Snapshots and the change log are durable;
/// subscriptions are in-process and rebuilt by callers after a reopen.
///
/// The token clock is recovered at open from the greatest persisted token,
/// so tokens stay monotonic across restarts even if the wall clock moved
/// backwards in between.
pub struct SqliteStore {
    inner: Mutex<SqliteState>,
}

struct SqliteState {
    conn: Connection,
    clock: TokenClock,
    subscribers: HashMap<DatasetId, Vec<Sender<ChangeRecord>>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::from_conn(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, StorageError> {
        crate::schema::init_schema(&conn)?;
        let clock = recover_clock(&conn)?;
        Ok(Self {
            inner: Mutex::new(SqliteState {
                conn,
                clock,
                subscribers: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteState>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Fast-forwards a fresh clock past every token this store has ever issued:
/// committed change tokens plus the creation tokens embedded in dataset ids.
/// Skipping the latter would let a post-restart append commit below a
/// dataset's creation token, where feed replays starting at creation would
/// never find it.
fn recover_clock(conn: &Connection) -> Result<TokenClock, StorageError> {
    let mut clock = TokenClock::new();

    {
        let mut stmt = conn.prepare("SELECT token FROM changes ORDER BY token DESC LIMIT 1")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        if let Some(row) = rows.next() {
            let token = SequenceToken::from_bytes(&to_array::<12>(row?, "token")?)?;
            clock.observe(&token)?;
        }
    }

    let mut stmt = conn.prepare("SELECT dataset_id FROM datasets")?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
    for row in rows {
        let dataset_id = DatasetId::from_bytes(to_array::<16>(row?, "dataset_id")?);
        clock.observe(&dataset_id.creation_token())?;
    }
    Ok(clock)
}

fn dataset_exists(conn: &Connection, dataset_id: DatasetId) -> Result<bool, StorageError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM datasets WHERE dataset_id = ?1)",
        rusqlite::params![dataset_id.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn read_changes_from(
    conn: &Connection,
    dataset_id: DatasetId,
    from: SequenceToken,
) -> Result<Vec<ChangeRecord>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT row_label, column_name, author_id, new_value, token FROM changes WHERE dataset_id = ?1 AND token >= ?2 ORDER BY token",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![dataset_id.as_bytes().as_slice(), &from.to_bytes()[..]],
        |row| {
            let row_label: i64 = row.get(0)?;
            let column: String = row.get(1)?;
            let author: String = row.get(2)?;
            let value_bytes: Vec<u8> = row.get(3)?;
            let token_bytes: Vec<u8> = row.get(4)?;
            Ok((row_label, column, author, value_bytes, token_bytes))
        },
    )?;

    let mut result = Vec::new();
    for row in rows {
        let (row_label, column, author, value_bytes, token_bytes) = row?;
        let new_value = CellValue::from_msgpack(&value_bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let token = SequenceToken::from_bytes(&to_array::<12>(token_bytes, "token")?)?;
        result.push(ChangeRecord {
            dataset_id,
            row: row_label,
            column,
            author_id: AuthorId::new(author),
            new_value,
            token,
        });
    }
    Ok(result)
}

impl ChangeStore for SqliteStore {
    fn publish_dataset(&self, document: &SnapshotDocument) -> Result<DatasetId, StorageError> {
        let mut state = self.lock()?;
        let token = state.clock.tick()?;
        let dataset_id = DatasetId::mint(token);
        let encoded = document.to_msgpack()?;
        let checksum = snapshot::checksum(&encoded);
        state.conn.execute(
            "INSERT INTO datasets (dataset_id, document, checksum) VALUES (?1, ?2, ?3)",
            rusqlite::params![dataset_id.as_bytes().as_slice(), encoded, &checksum[..]],
        )?;
        Ok(dataset_id)
    }

    fn load_dataset(&self, dataset_id: DatasetId) -> Result<SnapshotDocument, StorageError> {
        let state = self.lock()?;
        let mut stmt = state
            .conn
            .prepare("SELECT document, checksum FROM datasets WHERE dataset_id = ?1")?;
        let mut rows = stmt.query_map(
            rusqlite::params![dataset_id.as_bytes().as_slice()],
            |row| {
                let encoded: Vec<u8> = row.get(0)?;
                let checksum_bytes: Vec<u8> = row.get(1)?;
                Ok((encoded, checksum_bytes))
            },
        )?;

        match rows.next() {
            Some(Ok((encoded, checksum_bytes))) => {
                let stored = to_array::<32>(checksum_bytes, "checksum")?;
                if snapshot::checksum(&encoded) != stored {
                    return Err(StorageError::ChecksumMismatch {
                        dataset_id: dataset_id.to_string(),
                    });
                }
                Ok(SnapshotDocument::from_msgpack(&encoded)?)
            }
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Err(StorageError::DatasetNotFound(dataset_id.to_string())),
        }
    }

    fn append(
        &self,
        dataset_id: DatasetId,
        write: CellWrite,
    ) -> Result<SequenceToken, StorageError> {
        let mut state = self.lock()?;
        if !dataset_exists(&state.conn, dataset_id)? {
            return Err(StorageError::DatasetNotFound(dataset_id.to_string()));
        }

        let token = state.clock.tick()?;
        let record = ChangeRecord::from_write(dataset_id, write, token);
        let value_bytes = record
            .new_value
            .to_msgpack()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tx = state.conn.transaction()?;
        tx.execute(
            "INSERT INTO changes (dataset_id, row_label, column_name, author_id, new_value, token) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                dataset_id.as_bytes().as_slice(),
                record.row,
                &record.column,
                record.author_id.as_str(),
                value_bytes,
                &token.to_bytes()[..],
            ],
        )?;
        tx.commit()?;

        // Fan out only after the commit; subscribers must never observe a
        // record that could still roll back.
        if let Some(senders) = state.subscribers.get_mut(&dataset_id) {
            senders.retain(|sender| sender.send(record.clone()).is_ok());
        }
        Ok(token)
    }

    fn subscribe(
        &self,
        dataset_id: DatasetId,
        from: SequenceToken,
    ) -> Result<ChangeFeed, StorageError> {
        let mut state = self.lock()?;
        if !dataset_exists(&state.conn, dataset_id)? {
            return Err(StorageError::DatasetNotFound(dataset_id.to_string()));
        }

        let backlog = read_changes_from(&state.conn, dataset_id, from)?;
        let (sender, receiver) = channel::unbounded();
        for record in backlog {
            // The receiver is alive in this scope, so the send cannot fail.
            let _ = sender.send(record);
        }
        state.subscribers.entry(dataset_id).or_default().push(sender);
        Ok(ChangeFeed::new(receiver))
    }
}
