//! Tests for utility functions

use job_executor::util::{duration_from_ms, init_tracing, now_ms, Clock, ManualClock, SystemClock};
use std::time::Duration;

#[test]
fn test_system_clock_tracks_now() {
    let before = now_ms();
    let clock_now = SystemClock.now_ms();
    assert!(clock_now >= before);
}

#[test]
fn test_manual_clock_is_shareable() {
    let clock: std::sync::Arc<dyn Clock> = std::sync::Arc::new(ManualClock::new(5));
    assert_eq!(clock.now_ms(), 5);
}

#[test]
fn test_duration_from_ms() {
    assert_eq!(duration_from_ms(0), Duration::ZERO);
    assert_eq!(duration_from_ms(2_000), Duration::from_secs(2));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
