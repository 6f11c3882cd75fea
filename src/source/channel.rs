//! Per-crawl read channel backed by a single-worker thread pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::ContentSource;
use crate::config::EngineConfig;
use crate::error::SourceError;
use crate::models::{Location, Subgraph};

/// How long a waiting reader sleeps between checks of the cancel and interrupt flags.
const POLL_SLICE: Duration = Duration::from_millis(25);

pub struct ContentChannel {
    source: Arc<dyn ContentSource>,
    pool: Option<ThreadPool>,
    worker_exited: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    abort_waits: AtomicBool,
    interrupt: Arc<AtomicBool>,
    read_timeout: Duration,
    shutdown_grace: Duration,
}

impl ContentChannel {
    /// Start the worker and begin accepting reads.
    ///
    /// `interrupt` is the caller's cancellation flag; a wait observing it set returns
    /// [`SourceError::Interrupted`] without clearing it.
    pub fn start(
        source: Arc<dyn ContentSource>,
        config: &EngineConfig,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self, SourceError> {
        let (exit_tx, worker_exited) = mpsc::channel();
        let pool = ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|i| format!("content-channel-{}", i))
            .exit_handler(move |_| {
                let _ = exit_tx.send(());
            })
            .panic_handler(|_| tracing::warn!("subgraph read panicked on channel worker"))
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to start read worker: {}", e)))?;

        Ok(Self {
            source,
            pool: Some(pool),
            worker_exited,
            cancelled: Arc::new(AtomicBool::new(false)),
            abort_waits: AtomicBool::new(false),
            interrupt,
            read_timeout: config.read_timeout(),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    pub fn source_name(&self) -> &str {
        self.source.source_name()
    }

    /// Read a bounded subgraph, blocking until it completes, fails, times out,
    /// or the channel is cancelled or interrupted.
    pub fn read_subgraph(
        &self,
        location: &Location,
        workspace: &str,
        max_depth: usize,
    ) -> Result<Subgraph, SourceError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(SourceError::Cancelled);
        }
        let pool = self.pool.as_ref().ok_or(SourceError::Cancelled)?;

        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        let cancelled = Arc::clone(&self.cancelled);
        let workspace_owned = workspace.to_string();
        let location_owned = location.clone();
        pool.spawn(move || {
            // Reads queued behind a hung one are dropped once the channel is cancelled.
            let result = if cancelled.load(Ordering::SeqCst) {
                Err(SourceError::Cancelled)
            } else {
                source.read_subgraph(&workspace_owned, &location_owned, max_depth)
            };
            let _ = tx.send(result);
        });

        let started = Instant::now();
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(SourceError::Interrupted);
            }
            if self.abort_waits.load(Ordering::SeqCst) {
                return Err(SourceError::Cancelled);
            }
            let elapsed = started.elapsed();
            if elapsed >= self.read_timeout {
                return Err(SourceError::Timeout(self.read_timeout.as_millis() as u64));
            }
            match rx.recv_timeout(POLL_SLICE.min(self.read_timeout - elapsed)) {
                Ok(result) => {
                    tracing::debug!(
                        workspace,
                        path = %location.path,
                        max_depth,
                        ok = result.is_ok(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "subgraph read finished"
                    );
                    return result;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SourceError::Unavailable(
                        "read worker stopped without a result".to_string(),
                    ));
                }
            }
        }
    }

    /// Stop accepting reads. Best effort: an in-flight source call keeps running,
    /// but with `may_interrupt_in_progress` a caller blocked on it is released.
    pub fn cancel(&self, may_interrupt_in_progress: bool) {
        self.cancelled.store(true, Ordering::SeqCst);
        if may_interrupt_in_progress {
            self.abort_waits.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Shut the worker down and wait up to the grace period for it to exit.
    /// Returns whether it exited in time; overrunning is logged, never an error.
    pub fn close(&mut self) -> bool {
        let Some(pool) = self.pool.take() else {
            return true;
        };
        self.cancelled.store(true, Ordering::SeqCst);
        drop(pool);
        match self.worker_exited.recv_timeout(self.shutdown_grace) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    source = self.source.source_name(),
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "channel worker did not stop within the grace period"
                );
                false
            }
        }
    }
}

impl Drop for ContentChannel {
    fn drop(&mut self) {
        self.close();
    }
}
