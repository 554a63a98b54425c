use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    jobs_enqueued: AtomicU64,
    jobs_started: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_stalled: AtomicU64,
    fallback_used: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_job_enqueued() {
    increment(&COUNTERS.jobs_enqueued);
}

pub fn record_job_started() {
    increment(&COUNTERS.jobs_started);
}

pub fn record_job_succeeded() {
    increment(&COUNTERS.jobs_succeeded);
}

pub fn record_job_retried() {
    increment(&COUNTERS.jobs_retried);
}

pub fn record_job_failed() {
    increment(&COUNTERS.jobs_failed);
}

pub fn record_job_stalled() {
    increment(&COUNTERS.jobs_stalled);
}

pub fn record_fallback_used() {
    increment(&COUNTERS.fallback_used);
}

pub fn record_run_completed() {
    increment(&COUNTERS.runs_completed);
}

pub fn record_run_failed() {
    increment(&COUNTERS.runs_failed);
}

#[derive(Clone, Debug, Default)]
pub struct DispatcherMetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub jobs_stalled: u64,
    pub fallback_used: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
}

pub fn snapshot() -> DispatcherMetricsSnapshot {
    DispatcherMetricsSnapshot {
        jobs_enqueued: COUNTERS.jobs_enqueued.load(Ordering::Relaxed),
        jobs_started: COUNTERS.jobs_started.load(Ordering::Relaxed),
        jobs_succeeded: COUNTERS.jobs_succeeded.load(Ordering::Relaxed),
        jobs_retried: COUNTERS.jobs_retried.load(Ordering::Relaxed),
        jobs_failed: COUNTERS.jobs_failed.load(Ordering::Relaxed),
        jobs_stalled: COUNTERS.jobs_stalled.load(Ordering::Relaxed),
        fallback_used: COUNTERS.fallback_used.load(Ordering::Relaxed),
        runs_completed: COUNTERS.runs_completed.load(Ordering::Relaxed),
        runs_failed: COUNTERS.runs_failed.load(Ordering::Relaxed),
    }
}
