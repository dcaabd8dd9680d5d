//! Tests for the in-memory job repository

use job_executor::core::{ClaimRequest, Job, JobRepository};
use job_executor::infra::InMemoryJobRepository;
use proptest::prelude::*;
use std::collections::HashSet;

fn request(owner: &str, limit: usize, now_ms: u128) -> ClaimRequest {
    ClaimRequest {
        limit,
        lock_owner: owner.to_string(),
        now_ms,
        lock_expires_at_ms: now_ms + 10_000,
    }
}

proptest! {
    #[test]
    fn competing_owners_never_claim_the_same_job(
        jobs in prop::collection::vec((0u128..100, 0usize..3, any::<bool>()), 1..40),
        limits in prop::collection::vec(1usize..6, 1..10),
    ) {
        let repo = InMemoryJobRepository::new();
        for (due, instance, exclusive) in jobs {
            let mut job = Job::new("timer", due).in_process(format!("p{instance}"));
            if exclusive {
                job = job.exclusive();
            }
            repo.insert(job);
        }

        let mut seen = HashSet::new();
        for (round, limit) in limits.into_iter().enumerate() {
            let owner = if round % 2 == 0 { "node-a" } else { "node-b" };
            let acquired = repo.find_pending_jobs(&request(owner, limit, 100)).unwrap();
            prop_assert!(acquired.len() <= limit);
            for group in acquired.groups() {
                for id in group.ids() {
                    prop_assert!(seen.insert(*id), "job {} claimed twice", id);
                }
            }
        }
    }
}

#[test]
fn test_released_job_is_claimable_again() {
    let repo = InMemoryJobRepository::new();
    let id = repo.insert(Job::new("timer", 0));

    assert_eq!(repo.find_pending_jobs(&request("node-a", 5, 1)).unwrap().job_count(), 1);
    assert!(repo.find_pending_jobs(&request("node-b", 5, 2)).unwrap().is_empty());

    repo.release(&[id], "node-a").unwrap();
    let acquired = repo.find_pending_jobs(&request("node-b", 5, 3)).unwrap();
    assert_eq!(acquired.job_count(), 1);
    assert_eq!(repo.get(id).unwrap().lock_owner.as_deref(), Some("node-b"));
}
