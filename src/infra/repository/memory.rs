//! In-memory job repository for development and testing.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::job::{AcquiredJobs, ClaimRequest, Job, JobGroup, JobId, JobRepository};
use crate::core::RepositoryError;

#[derive(Debug, Default)]
struct Store {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
}

impl Store {
    /// Latest lock expiry per process instance holding a live exclusive claim.
    fn blocked_instances(&self, now_ms: u128) -> HashMap<&str, Option<u128>> {
        let mut blocked: HashMap<&str, Option<u128>> = HashMap::new();
        for job in self.jobs.values() {
            if !job.exclusive || job.is_unclaimed_at(now_ms) {
                continue;
            }
            if let Some(instance) = job.process_instance_id.as_deref() {
                let until = blocked.entry(instance).or_insert(Some(0));
                *until = match (*until, job.lock_expires_at_ms) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
        }
        blocked
    }

    fn claimable_groups(&self, limit: usize, now_ms: u128) -> Vec<JobGroup> {
        let blocked = self.blocked_instances(now_ms);

        let mut due: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.due_at_ms <= now_ms && job.is_unclaimed_at(now_ms))
            .collect();
        due.sort_by_key(|job| (job.due_at_ms, job.id));

        let mut exclusive: HashMap<&str, Vec<JobId>> = HashMap::new();
        for job in &due {
            if let (true, Some(instance)) = (job.exclusive, job.process_instance_id.as_deref()) {
                exclusive.entry(instance).or_default().push(job.id);
            }
        }

        let mut taken: HashSet<&str> = HashSet::new();
        let mut groups = Vec::new();
        for job in due {
            if groups.len() >= limit {
                break;
            }
            match (job.exclusive, job.process_instance_id.as_deref()) {
                (true, Some(instance)) => {
                    if blocked.contains_key(instance) || !taken.insert(instance) {
                        continue;
                    }
                    let ids = exclusive.remove(instance).unwrap_or_default();
                    groups.extend(JobGroup::from_ids(ids));
                }
                _ => groups.push(JobGroup::Single(job.id)),
            }
        }
        groups
    }
}

/// Job store held in process memory.
///
/// Exclusive jobs of one process instance are claimed together as a single
/// ordered group, and never while another exclusive job of that instance is
/// still claimed.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    store: Mutex<Store>,
}

impl InMemoryJobRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `job` under a fresh id (starting at 1) and return the id.
    pub fn insert(&self, mut job: Job) -> JobId {
        let mut store = self.store.lock();
        store.next_id += 1;
        let id = store.next_id;
        job.id = id;
        store.jobs.insert(id, job);
        id
    }

    /// Copy of the job stored under `id`.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.store.lock().jobs.get(&id).cloned()
    }

    /// Copy of every stored job, ordered by id.
    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        self.store.lock().jobs.values().cloned().collect()
    }

    /// Number of stored jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().jobs.len()
    }

    /// True when no jobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.lock().jobs.is_empty()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn find_job(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.get(id))
    }

    fn find_pending_jobs(&self, request: &ClaimRequest) -> Result<AcquiredJobs, RepositoryError> {
        let mut store = self.store.lock();
        let groups = store.claimable_groups(request.limit, request.now_ms);

        for id in groups.iter().flat_map(JobGroup::ids) {
            if let Some(job) = store.jobs.get_mut(id) {
                job.lock_owner = Some(request.lock_owner.clone());
                job.lock_expires_at_ms = Some(request.lock_expires_at_ms);
            }
        }

        let acquired = AcquiredJobs::from(groups);
        if !acquired.is_empty() {
            debug!(
                groups = acquired.len(),
                jobs = acquired.job_count(),
                lock_owner = %request.lock_owner,
                "Claimed pending jobs"
            );
        }
        Ok(acquired)
    }

    fn release(&self, ids: &[JobId], lock_owner: &str) -> Result<(), RepositoryError> {
        let mut store = self.store.lock();
        for id in ids {
            let Some(job) = store.jobs.get_mut(id) else {
                continue;
            };
            if job.lock_owner.as_deref() == Some(lock_owner) {
                job.lock_owner = None;
                job.lock_expires_at_ms = None;
            }
        }
        Ok(())
    }

    fn delete_job(&self, id: JobId) -> Result<(), RepositoryError> {
        self.store.lock().jobs.remove(&id);
        Ok(())
    }

    fn next_due_at(&self, now_ms: u128) -> Result<Option<u128>, RepositoryError> {
        let store = self.store.lock();
        let blocked = store.blocked_instances(now_ms);

        let next = store
            .jobs
            .values()
            .filter_map(|job| {
                let mut at = job.due_at_ms;
                if !job.is_unclaimed_at(now_ms) {
                    at = at.max(job.lock_expires_at_ms?);
                }
                if let (true, Some(instance)) = (job.exclusive, job.process_instance_id.as_deref()) {
                    if let Some(until) = blocked.get(instance) {
                        at = at.max((*until)?);
                    }
                }
                Some(at)
            })
            .min();
        Ok(next)
    }
}
