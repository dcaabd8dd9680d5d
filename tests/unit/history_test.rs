//! Property tests for the execution history ring

use job_executor::core::{HistoryEntry, HistoryError, HistoryRing, JobError};
use proptest::prelude::*;

fn completed(id: u64) -> HistoryEntry {
    HistoryEntry::started(id, format!("job-{id}"), 10).completed(20)
}

proptest! {
    #[test]
    fn size_is_min_of_capacity_and_records(capacity in 1usize..32, records in 0usize..100) {
        let ring = HistoryRing::new(capacity);
        for id in 0..records {
            ring.record(completed(id as u64));
        }
        prop_assert_eq!(ring.size(), capacity.min(records));
    }

    #[test]
    fn last_job_is_always_the_latest(capacity in 1usize..16, records in 1usize..80) {
        let ring = HistoryRing::new(capacity);
        for id in 0..records {
            ring.record(completed(id as u64));
            prop_assert_eq!(ring.last_job().map(|e| e.job_id()), Some(id as u64));
        }
    }

    #[test]
    fn previous_job_fails_exactly_out_of_range(capacity in 1usize..16, records in 0usize..40) {
        let ring = HistoryRing::new(capacity);
        for id in 0..records {
            ring.record(completed(id as u64));
        }
        let size = ring.size();
        for n in 0..size {
            let entry = ring.previous_job(n).unwrap();
            prop_assert_eq!(entry.job_id(), (records - 1 - n) as u64);
        }
        for n in size..size + 3 {
            prop_assert_eq!(ring.previous_job(n).unwrap_err(), HistoryError::OutOfRange { index: n, size });
        }
    }
}

#[test]
fn test_failed_entries_keep_their_error() {
    let ring = HistoryRing::new(2);
    ring.record(HistoryEntry::started(1, "job-1", 0).failed(JobError::NotFound(1)));
    let entry = ring.last_job().unwrap();
    assert!(!entry.is_completed());
    assert!(matches!(entry.failure(), Some(JobError::NotFound(1))));
    assert_eq!(entry.label(), "job-1");
}
