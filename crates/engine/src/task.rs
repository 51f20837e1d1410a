use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam::channel::Sender;

use crate::error::EngineError;

/// Shutdown channel and join handle for one background task.
///
/// Dropping the handle disconnects the shutdown channel, which also stops
/// the task, but discards its terminal result; call [`TaskHandle::stop`]
/// to observe it.
pub struct TaskHandle {
    shutdown: Sender<()>,
    join: Option<JoinHandle<Result<(), EngineError>>>,
    degraded: Arc<AtomicBool>,
}

impl TaskHandle {
    pub(crate) fn new(
        shutdown: Sender<()>,
        join: JoinHandle<Result<(), EngineError>>,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shutdown,
            join: Some(join),
            degraded,
        }
    }

    /// True while the task is failing repeatedly against the store. Cleared
    /// by the task itself on its next success.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|join| join.is_finished()).unwrap_or(true)
    }

    /// Signals shutdown and joins the task, returning its terminal result.
    /// Idempotent; a second call returns `Ok(())`.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        // The task may have already exited and dropped its receiver.
        let _ = self.shutdown.send(());
        match join.join() {
            Ok(result) => result,
            Err(panic) => Err(EngineError::TaskPanicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handles for the two background halves of a live session.
pub struct SyncHandles {
    pub pump: TaskHandle,
    pub listener: TaskHandle,
}

impl SyncHandles {
    /// Stops both tasks, pump first so no upload lands after the listener
    /// detaches. Both are always joined; the first error wins.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        let pump = self.pump.stop();
        let listener = self.listener.stop();
        pump.and(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::thread;

    #[test]
    fn stop_joins_and_is_idempotent() {
        let (tx, rx) = channel::bounded::<()>(1);
        let join = thread::spawn(move || {
            let _ = rx.recv();
            Ok(())
        });
        let mut handle = TaskHandle::new(tx, join, Arc::new(AtomicBool::new(false)));
        assert!(handle.stop().is_ok());
        assert!(handle.stop().is_ok());
        assert!(handle.is_finished());
    }

    #[test]
    fn panic_surfaces_as_task_panicked() {
        let (tx, rx) = channel::bounded::<()>(1);
        let join = thread::spawn(move || -> Result<(), EngineError> {
            let _ = rx.recv();
            panic!("boom");
        });
        let mut handle = TaskHandle::new(tx, join, Arc::new(AtomicBool::new(false)));
        match handle.stop() {
            Err(EngineError::TaskPanicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected TaskPanicked, got {other:?}"),
        }
    }

    #[test]
    fn degraded_flag_is_shared() {
        let degraded = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel::bounded::<()>(1);
        let join = thread::spawn(move || {
            let _ = rx.recv();
            Ok(())
        });
        let mut handle = TaskHandle::new(tx, join, Arc::clone(&degraded));
        assert!(!handle.is_degraded());
        degraded.store(true, Ordering::Relaxed);
        assert!(handle.is_degraded());
        handle.stop().unwrap();
    }
}
