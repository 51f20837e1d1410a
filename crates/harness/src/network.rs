use std::sync::Arc;

use coframe_core::Table;
use coframe_engine::EngineError;
use coframe_storage::{ChangeStore, MemoryStore};

use crate::TestPeer;

/// Collaborators attached to one shared store.
pub struct TestNetwork {
    store: Arc<dyn ChangeStore>,
    peers: Vec<TestPeer>,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    /// A network backed by a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// A network backed by the given store, which may inject failures.
    pub fn with_store(store: Arc<dyn ChangeStore>) -> Self {
        Self {
            store,
            peers: Vec::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn ChangeStore> {
        Arc::clone(&self.store)
    }

    /// Shares `table` from a new peer and returns the peer's index.
    pub fn share(&mut self, author: &str, table: Table) -> Result<usize, EngineError> {
        let peer = TestPeer::share(self.store(), author, table)?;
        Ok(self.push(peer))
    }

    /// Joins the dataset shared by peer `sharer` as a new peer.
    pub fn join(&mut self, sharer: usize, author: &str) -> Result<usize, EngineError> {
        let locator = self.peers[sharer].session.locator().clone();
        let peer = TestPeer::join(self.store(), &locator, author)?;
        Ok(self.push(peer))
    }

    pub fn peer(&self, index: usize) -> &TestPeer {
        &self.peers[index]
    }

    /// Stops every peer, surfacing the first task failure.
    pub fn stop_all(mut self) -> Result<(), EngineError> {
        let mut outcome = Ok(());
        for peer in self.peers.drain(..) {
            let stopped = peer.stop();
            if outcome.is_ok() {
                outcome = stopped;
            }
        }
        outcome
    }

    fn push(&mut self, peer: TestPeer) -> usize {
        let index = self.peers.len();
        self.peers.push(peer);
        index
    }
}
