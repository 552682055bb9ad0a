//! Transformation queue (spec §4.6).
//!
//! A bounded FIFO of `TransformationTask`s backed by `tokio::sync::mpsc`,
//! with atomic pending/completed/failed counters so the sync-status
//! endpoint can report progress without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::TransformationTask;

pub struct TransformationQueue {
    sender: mpsc::Sender<TransformationTask>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<TransformationTask>>,
    pending: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl TransformationQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity);
        Arc::new(Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            pending: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub async fn enqueue(&self, task: TransformationTask) -> Result<(), mpsc::error::SendError<TransformationTask>> {
        self.sender.send(task).await?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn dequeue(&self) -> Option<TransformationTask> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    pub fn mark_completed(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_failed(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Drains and discards every task currently queued, resetting the
    /// pending counter. Idempotent: calling it on an already-empty queue
    /// is a no-op.
    pub async fn clear(&self) -> u64 {
        let mut receiver = self.receiver.lock().await;
        let mut drained = 0u64;
        while receiver.try_recv().is_ok() {
            drained += 1;
        }
        self.pending.fetch_sub(drained.min(self.pending.load(Ordering::SeqCst)), Ordering::SeqCst);
        drained
    }
}
