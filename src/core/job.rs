//! Job records, claim batches and the job repository boundary.

use serde::{Deserialize, Serialize};

use crate::core::RepositoryError;

/// Identifier of an externally persisted job.
pub type JobId = u64;

/// A unit of deferred work (timer fire, async continuation, retry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Selects the business logic that runs this job.
    pub handler_type: String,
    /// Opaque handler configuration.
    pub payload: serde_json::Value,
    /// Earliest time the job may run (ms since epoch).
    pub due_at_ms: u128,
    /// Remaining attempts, maintained by the repository owner.
    pub retries: u32,
    /// Exclusive jobs of one process instance never run concurrently.
    pub exclusive: bool,
    /// Process instance the job belongs to, if any.
    pub process_instance_id: Option<String>,
    /// Scheduler instance currently holding the claim.
    pub lock_owner: Option<String>,
    /// When the current claim lapses (ms since epoch).
    pub lock_expires_at_ms: Option<u128>,
}

impl Job {
    /// Create an unclaimed, non-exclusive job due at `due_at_ms`.
    ///
    /// The id is assigned by the repository on insert.
    pub fn new(handler_type: impl Into<String>, due_at_ms: u128) -> Self {
        Self {
            id: 0,
            handler_type: handler_type.into(),
            payload: serde_json::Value::Null,
            due_at_ms,
            retries: 3,
            exclusive: false,
            process_instance_id: None,
            lock_owner: None,
            lock_expires_at_ms: None,
        }
    }

    /// Attach a handler payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Bind the job to a process instance.
    #[must_use]
    pub fn in_process(mut self, process_instance_id: impl Into<String>) -> Self {
        self.process_instance_id = Some(process_instance_id.into());
        self
    }

    /// Mark the job exclusive within its process instance.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// True when no live claim exists at `now_ms`.
    #[must_use]
    pub fn is_unclaimed_at(&self, now_ms: u128) -> bool {
        match (&self.lock_owner, self.lock_expires_at_ms) {
            (None, _) => true,
            (Some(_), Some(expires)) => expires <= now_ms,
            (Some(_), None) => false,
        }
    }
}

/// Jobs that run together on one worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobGroup {
    /// An independently runnable job.
    Single(JobId),
    /// Causally dependent jobs, run strictly in this order on one thread.
    Ordered(Vec<JobId>),
}

impl JobGroup {
    /// Build a group from ids, collapsing a one-element list to `Single`.
    ///
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn from_ids(mut ids: Vec<JobId>) -> Option<Self> {
        match ids.len() {
            0 => None,
            1 => ids.pop().map(Self::Single),
            _ => Some(Self::Ordered(ids)),
        }
    }

    /// Ids of the group in execution order.
    #[must_use]
    pub fn ids(&self) -> &[JobId] {
        match self {
            Self::Single(id) => std::slice::from_ref(id),
            Self::Ordered(ids) => ids,
        }
    }

    /// Consume the group into its ids.
    #[must_use]
    pub fn into_ids(self) -> Vec<JobId> {
        match self {
            Self::Single(id) => vec![id],
            Self::Ordered(ids) => ids,
        }
    }
}

/// Result of one claim: groups that may run concurrently with each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquiredJobs {
    groups: Vec<JobGroup>,
}

impl AcquiredJobs {
    /// Empty claim result.
    #[must_use]
    pub const fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Append a group.
    pub fn push(&mut self, group: JobGroup) {
        self.groups.push(group);
    }

    /// Number of groups (worker slots needed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True when nothing was claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of job ids across all groups.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.groups.iter().map(|g| g.ids().len()).sum()
    }

    /// Borrow the groups in claim order.
    #[must_use]
    pub fn groups(&self) -> &[JobGroup] {
        &self.groups
    }
}

impl From<Vec<JobGroup>> for AcquiredJobs {
    fn from(groups: Vec<JobGroup>) -> Self {
        Self { groups }
    }
}

impl IntoIterator for AcquiredJobs {
    type Item = JobGroup;
    type IntoIter = std::vec::IntoIter<JobGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Parameters of one atomic claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Maximum number of groups to claim.
    pub limit: usize,
    /// Owner recorded on every claimed job.
    pub lock_owner: String,
    /// Time the claim is made (ms since epoch).
    pub now_ms: u128,
    /// When the claims lapse if never released (ms since epoch).
    pub lock_expires_at_ms: u128,
}

/// Persistence boundary for jobs.
///
/// Implementations must guarantee that no two concurrent claims, in this
/// process or another, return the same job id.
pub trait JobRepository: Send + Sync + 'static {
    /// Look a job up by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be read.
    fn find_job(&self, id: JobId) -> Result<Option<Job>, RepositoryError>;

    /// Atomically claim up to `request.limit` groups of due jobs.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the claim could not be made; nothing is
    /// claimed in that case.
    fn find_pending_jobs(&self, request: &ClaimRequest) -> Result<AcquiredJobs, RepositoryError>;

    /// Give jobs back: clear claims held by `lock_owner` without touching due
    /// time or retries.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the claims could not be cleared.
    fn release(&self, ids: &[JobId], lock_owner: &str) -> Result<(), RepositoryError>;

    /// Remove a job that finished successfully.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be written.
    fn delete_job(&self, id: JobId) -> Result<(), RepositoryError>;

    /// Earliest moment any job becomes claimable, if known.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be read.
    fn next_due_at(&self, _now_ms: u128) -> Result<Option<u128>, RepositoryError> {
        Ok(None)
    }
}
