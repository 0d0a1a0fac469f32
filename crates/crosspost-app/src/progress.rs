//! Progress channel for detection and sync batches
//!
//! Workers push [`ProgressEvent`]s into one mpsc stream. The consumer either
//! collects the whole map ([`ProgressStream::collect`]) or drives a
//! [`ProgressSink`] as items arrive. Cancelling aborts the workers and ends
//! the stream without a completion callback.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crosspost_core::prelude::*;
use crosspost_core::{PlatformId, SyncState};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent<R> {
    /// A sync outcome changed state
    Update {
        platform_id: PlatformId,
        state: SyncState,
    },
    /// A platform reached its final result
    Finished {
        platform_id: PlatformId,
        result: R,
        completed: usize,
        total: usize,
    },
}

/// Receives progressive results
pub trait ProgressSink<R> {
    fn on_update(&mut self, _platform_id: &str, _state: SyncState) {}

    fn on_item(&mut self, platform_id: &str, result: &R, completed: usize, total: usize);

    /// Every platform finished; never called for a cancelled run
    fn on_complete(&mut self, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Producer half, cloned into every worker
pub struct ProgressSender<R> {
    tx: mpsc::UnboundedSender<ProgressEvent<R>>,
    /// Held while sending so counters arrive in order
    completed: Arc<Mutex<usize>>,
    total: usize,
}

impl<R> Clone for ProgressSender<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            completed: Arc::clone(&self.completed),
            total: self.total,
        }
    }
}

impl<R> ProgressSender<R> {
    pub fn update(&self, platform_id: &str, state: SyncState) {
        let _ = self.tx.send(ProgressEvent::Update {
            platform_id: platform_id.to_string(),
            state,
        });
    }

    pub fn finished(&self, platform_id: &str, result: R) {
        let mut completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        *completed += 1;
        if self
            .tx
            .send(ProgressEvent::Finished {
                platform_id: platform_id.to_string(),
                result,
                completed: *completed,
                total: self.total,
            })
            .is_err()
        {
            trace!("Progress receiver gone, dropping result for {}", platform_id);
        }
    }
}

/// Create a progress channel for `total` platforms
pub fn channel<R>(total: usize, cancel: &CancelHandle) -> (ProgressSender<R>, ProgressStream<R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = ProgressSender {
        tx,
        completed: Arc::new(Mutex::new(0)),
        total,
    };
    let stream = ProgressStream {
        rx,
        total,
        cancel: cancel.clone(),
    };
    (sender, stream)
}

/// Run `workers` until they finish or `cancel` fires, then abort the rest
pub fn supervise(mut workers: JoinSet<()>, cancel: CancelHandle) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Batch cancelled, aborting {} workers", workers.len());
                workers.abort_all();
            }
            _ = async {
                while let Some(joined) = workers.join_next().await {
                    if let Err(e) = joined {
                        error!("Worker task failed: {}", e);
                    }
                }
            } => {}
        }
    });
}

pub struct ProgressStream<R> {
    rx: mpsc::UnboundedReceiver<ProgressEvent<R>>,
    total: usize,
    cancel: CancelHandle,
}

impl<R> ProgressStream<R> {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next event; `None` once every sender is gone or the run was cancelled
    pub async fn next(&mut self) -> Option<ProgressEvent<R>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Batch mode: wait for the full `platform_id → result` map
    pub async fn collect(mut self) -> Result<BTreeMap<PlatformId, R>> {
        let mut results = BTreeMap::new();
        while results.len() < self.total {
            match self.next().await {
                Some(ProgressEvent::Finished {
                    platform_id,
                    result,
                    ..
                }) => {
                    results.insert(platform_id, result);
                }
                Some(ProgressEvent::Update { .. }) => {}
                None => break,
            }
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(results)
    }

    /// Progressive mode; returns how many platforms finished
    pub async fn drive<S>(mut self, sink: &mut S) -> usize
    where
        S: ProgressSink<R> + ?Sized,
    {
        let mut completed = 0;
        if self.total == 0 {
            sink.on_complete(0);
            return 0;
        }
        while let Some(event) = self.next().await {
            match event {
                ProgressEvent::Update { platform_id, state } => sink.on_update(&platform_id, state),
                ProgressEvent::Finished {
                    platform_id,
                    result,
                    completed: done,
                    total,
                } => {
                    completed = done;
                    sink.on_item(&platform_id, &result, done, total);
                    if done == total {
                        sink.on_complete(total);
                        break;
                    }
                }
            }
        }
        completed
    }
}
