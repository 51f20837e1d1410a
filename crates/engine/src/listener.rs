use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use coframe_core::{ids::DatasetId, token::SequenceToken};
use coframe_storage::{ChangeFeed, ChangeStore};

use crate::error::{EngineError, permanent_failure};
use crate::shadow::ShadowSet;

/// Background half that folds the dataset's change feed into the shadow set.
///
/// The first subscription starts at the dataset's creation token, so the
/// full history replays on attach; after that the resume point is the last
/// processed token. Keyed apply absorbs the overlap either way.
pub(crate) struct DownloadListener {
    store: Arc<dyn ChangeStore>,
    dataset_id: DatasetId,
    shadows: Arc<RwLock<ShadowSet>>,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
    max_consecutive_failures: u32,
    degraded: Arc<AtomicBool>,
    shutdown: Receiver<()>,
}

enum Drained {
    Shutdown,
    FeedClosed,
}

impl DownloadListener {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn ChangeStore>,
        dataset_id: DatasetId,
        shadows: Arc<RwLock<ShadowSet>>,
        retry_backoff: Duration,
        max_retry_backoff: Duration,
        max_consecutive_failures: u32,
        degraded: Arc<AtomicBool>,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            store,
            dataset_id,
            shadows,
            retry_backoff,
            max_retry_backoff,
            max_consecutive_failures,
            degraded,
            shutdown,
        }
    }

    pub(crate) fn run(self) -> Result<(), EngineError> {
        tracing::info!("download listener started for {:?}", self.dataset_id);
        let mut resume = self.dataset_id.creation_token();
        let mut failures: u32 = 0;
        let mut backoff = self.retry_backoff;

        loop {
            let feed = match self.store.subscribe(self.dataset_id, resume) {
                Ok(feed) => {
                    failures = 0;
                    backoff = self.retry_backoff;
                    self.degraded.store(false, Ordering::Relaxed);
                    feed
                }
                Err(err) => {
                    let err = EngineError::from(err);
                    if permanent_failure(&err) {
                        tracing::error!("download listener stopping: {err}");
                        return Err(err);
                    }
                    failures += 1;
                    tracing::warn!("subscribe failed ({failures} consecutive): {err}");
                    if failures >= self.max_consecutive_failures {
                        self.degraded.store(true, Ordering::Relaxed);
                    }
                    if self.pause(backoff) {
                        return Ok(());
                    }
                    backoff = (backoff * 2).min(self.max_retry_backoff);
                    continue;
                }
            };

            match self.drain(&feed, &mut resume)? {
                Drained::Shutdown => {
                    tracing::info!("download listener stopping for {:?}", self.dataset_id);
                    return Ok(());
                }
                Drained::FeedClosed => {
                    tracing::warn!(
                        "change feed closed, resubscribing from {:?}",
                        resume
                    );
                    if self.pause(self.retry_backoff) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Consumes the feed until shutdown or the store side disconnects,
    /// advancing the resume token past every processed record.
    fn drain(
        &self,
        feed: &ChangeFeed,
        resume: &mut SequenceToken,
    ) -> Result<Drained, EngineError> {
        loop {
            crossbeam::select! {
                recv(self.shutdown) -> _ => return Ok(Drained::Shutdown),
                recv(feed.receiver()) -> msg => match msg {
                    Ok(record) => {
                        tracing::trace!(
                            "routing record {:?} from {}",
                            record.token,
                            record.author_id
                        );
                        let mut shadows = self
                            .shadows
                            .write()
                            .map_err(|_| EngineError::LockPoisoned)?;
                        shadows.apply(&record);
                        *resume = record.token;
                    }
                    Err(_) => return Ok(Drained::FeedClosed),
                },
            }
        }
    }

    /// Interruptible sleep; true means shutdown arrived during the pause.
    fn pause(&self, duration: Duration) -> bool {
        !matches!(
            self.shutdown.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }
}
