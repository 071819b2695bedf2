//! Bounded FIFO queue of admitted jobs.
//!
//! Capacity counts both pending and executing jobs: a slot is taken on
//! enqueue and only released when the worker drops the job's
//! [`SlotLease`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use report_core::{JobId, JobSubmission};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::EngineError;

#[derive(Debug, Default)]
struct Slots {
    pending: VecDeque<JobSubmission>,
    executing: usize,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    slots: Mutex<Slots>,
    available: Notify,
    capacity: usize,
}

/// Shared handle to the job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

/// A dequeued job together with the capacity slot it occupies.
#[derive(Debug)]
pub struct QueuedJob {
    pub submission: JobSubmission,
    _lease: SlotLease,
}

/// Releases one executing slot when dropped.
#[derive(Debug)]
pub struct SlotLease {
    shared: Arc<Shared>,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock();
        slots.executing = slots.executing.saturating_sub(1);
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots::default()),
                available: Notify::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Admit a job without blocking.
    ///
    /// Returns the job's 1-based position in the pending queue. Fails with
    /// [`EngineError::ShuttingDown`] once the queue is closed.
    pub fn try_enqueue(&self, submission: JobSubmission) -> Result<usize, EngineError> {
        let position = {
            let mut slots = self.shared.slots.lock();
            if slots.closed {
                return Err(EngineError::ShuttingDown);
            }
            if slots.pending.len() + slots.executing >= self.shared.capacity {
                return Err(EngineError::QueueFull {
                    capacity: self.shared.capacity,
                });
            }
            slots.pending.push_back(submission);
            slots.pending.len()
        };
        self.shared.available.notify_one();
        Ok(position)
    }

    /// Take the oldest job, waiting up to `timeout` for one to arrive.
    pub async fn dequeue(&self, timeout: Duration) -> Option<QueuedJob> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            // Register interest before checking so an enqueue in between
            // is not missed.
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue() {
                return Some(job);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Take the oldest job if one is pending.
    pub fn try_dequeue(&self) -> Option<QueuedJob> {
        let mut slots = self.shared.slots.lock();
        let submission = slots.pending.pop_front()?;
        slots.executing += 1;
        Some(QueuedJob {
            submission,
            _lease: SlotLease {
                shared: Arc::clone(&self.shared),
            },
        })
    }

    /// Refuse further enqueues. Pending jobs stay where they are.
    pub fn close(&self) {
        self.shared.slots.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.slots.lock().closed
    }

    /// Close the queue and remove every pending job, oldest first.
    ///
    /// Both happen under one lock, so nothing can be enqueued after the
    /// returned batch.
    pub fn close_and_drain(&self) -> Vec<JobSubmission> {
        let mut slots = self.shared.slots.lock();
        slots.closed = true;
        slots.pending.drain(..).collect()
    }

    /// Number of pending jobs.
    pub fn size(&self) -> usize {
        self.shared.slots.lock().pending.len()
    }

    /// Number of dequeued jobs whose slot has not been released yet.
    pub fn executing(&self) -> usize {
        self.shared.slots.lock().executing
    }

    pub fn is_full(&self) -> bool {
        let slots = self.shared.slots.lock();
        slots.pending.len() + slots.executing >= self.shared.capacity
    }

    /// 1-based position of a pending job. Stale as soon as it is returned.
    pub fn approximate_position(&self, job_id: &JobId) -> Option<usize> {
        self.shared
            .slots
            .lock()
            .pending
            .iter()
            .position(|submission| &submission.id == job_id)
            .map(|index| index + 1)
    }
}
