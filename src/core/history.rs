//! Rolling record of recently finished job executions.
//!
//! The ring is written by every worker thread and read by monitoring code.
//! Writers never contend on a shared lock in the common case: each call to
//! [`HistoryRing::record`] claims a ticket from an atomic cursor and writes
//! only its own slot. Only the writer whose ticket runs past the end folds
//! the cursor back, and it does so under a dedicated wrap lock.
//!
//! Reads are approximate. [`HistoryRing::previous_job`] checks the size and
//! reads the cursor at call time; a concurrent writer may move the cursor
//! between the two. This staleness is accepted for a diagnostic facility.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::job::JobId;
use crate::core::{HistoryError, JobError};

/// Outcome of one job execution attempt.
#[derive(Debug)]
pub struct HistoryEntry {
    job_id: JobId,
    label: String,
    started_at_ms: u128,
    completed_at_ms: Option<u128>,
    failure: Option<JobError>,
}

impl HistoryEntry {
    /// Open an entry for a job that is starting now.
    pub fn started(job_id: JobId, label: impl Into<String>, started_at_ms: u128) -> Self {
        Self {
            job_id,
            label: label.into(),
            started_at_ms,
            completed_at_ms: None,
            failure: None,
        }
    }

    /// Finish the entry as successful.
    #[must_use]
    pub fn completed(mut self, at_ms: u128) -> Self {
        self.completed_at_ms = Some(at_ms);
        self
    }

    /// Finish the entry with the captured failure.
    #[must_use]
    pub fn failed(mut self, error: JobError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Job this entry describes.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// When execution started.
    #[must_use]
    pub const fn started_at_ms(&self) -> u128 {
        self.started_at_ms
    }

    /// When execution completed successfully.
    #[must_use]
    pub const fn completed_at_ms(&self) -> Option<u128> {
        self.completed_at_ms
    }

    /// The failure captured for this attempt.
    #[must_use]
    pub const fn failure(&self) -> Option<&JobError> {
        self.failure.as_ref()
    }

    /// True if the attempt completed without failure.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at_ms.is_some() && self.failure.is_none()
    }
}

type Slot = Mutex<Option<Arc<HistoryEntry>>>;

/// Fixed-capacity, wrap-around FIFO of finished executions.
pub struct HistoryRing {
    slots: Box<[Slot]>,
    cursor: AtomicUsize,
    size: AtomicUsize,
    wrap: Mutex<()>,
}

impl HistoryRing {
    /// Create an empty ring holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            wrap: Mutex::new(()),
        }
    }

    /// Append `entry` as the latest record, overwriting the oldest once full.
    pub fn record(&self, entry: HistoryEntry) {
        let capacity = self.capacity();
        let ticket = self.cursor.fetch_add(1, Ordering::AcqRel) + 1;
        let index = ticket % capacity;

        if ticket >= capacity {
            let _guard = self.wrap.lock();
            // Another writer may already have folded the cursor.
            let _ = self.cursor.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current >= capacity).then(|| current % capacity)
            });
        }

        *self.slots[index].lock() = Some(Arc::new(entry));

        let _ = self.size.fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
            (size < capacity).then_some(size + 1)
        });
    }

    /// Number of entries retained; never exceeds [`capacity`](Self::capacity).
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Maximum number of entries retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The most recently recorded entry.
    #[must_use]
    pub fn last_job(&self) -> Option<Arc<HistoryEntry>> {
        let index = self.cursor.load(Ordering::Acquire) % self.capacity();
        self.slots[index].lock().clone()
    }

    /// The entry `n` records older than the latest (`0` is the latest).
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::OutOfRange` if `n >= size()`.
    pub fn previous_job(&self, n: usize) -> Result<Arc<HistoryEntry>, HistoryError> {
        let size = self.size();
        if n >= size {
            return Err(HistoryError::OutOfRange { index: n, size });
        }
        let capacity = self.capacity();
        let latest = self.cursor.load(Ordering::Acquire) % capacity;
        let index = (latest + capacity - n % capacity) % capacity;
        self.slots[index]
            .lock()
            .clone()
            .ok_or(HistoryError::OutOfRange { index: n, size })
    }

    /// Retained entries, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<HistoryEntry>> {
        (0..self.size())
            .map_while(|n| self.previous_job(n).ok())
            .collect()
    }
}

impl std::fmt::Debug for HistoryRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRing")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}
