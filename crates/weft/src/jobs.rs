//! Background job offloading.
//!
//! Background language calls leave the evaluator's thread through a
//! [`JobManager`]. Jobs never re-enter the engine's mutable state: each one
//! captures a runtime handle (whose internal lock serializes cross-thread
//! access) and produces only an output string, spliced into the block's
//! output at the barrier.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// Identifier for a submitted job, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

/// Runs background jobs and collects their output.
pub trait JobManager: Send + Sync {
    /// Submits a job for concurrent execution.
    fn submit(&self, job: Box<dyn FnOnce() -> String + Send>) -> JobId;

    /// Blocks until every submitted job finishes, returning their outputs
    /// in submission order and clearing the completed set.
    fn wait_all(&self) -> Vec<String>;

    /// Number of jobs submitted but not yet collected.
    fn pending(&self) -> usize;
}

/// Thread-per-job manager, sufficient for the occasional background call.
#[derive(Debug, Default)]
pub struct ThreadJobManager {
    handles: Mutex<Vec<(JobId, JoinHandle<String>)>>,
    next_id: AtomicU64,
}

impl ThreadJobManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobManager for ThreadJobManager {
    fn submit(&self, job: Box<dyn FnOnce() -> String + Send>) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = std::thread::spawn(job);
        self.handles.lock().expect("job manager lock poisoned").push((id, handle));
        id
    }

    fn wait_all(&self) -> Vec<String> {
        let handles = std::mem::take(&mut *self.handles.lock().expect("job manager lock poisoned"));
        handles
            .into_iter()
            .map(|(_, handle)| handle.join().unwrap_or_else(|_| String::new()))
            .collect()
    }

    fn pending(&self) -> usize {
        self.handles.lock().expect("job manager lock poisoned").len()
    }
}
