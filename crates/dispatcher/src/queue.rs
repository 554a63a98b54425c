//! In-memory delayed job queue with leases.
//!
//! Workers pull ready jobs, hold a lease while processing, then ack or
//! schedule a retry. A job whose lease expires goes back to ready; a job
//! that stalls more than `max_stalled` times is dropped as dead.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use inboxshot_core_types::JobId;

use crate::job::JobPayload;
use crate::metrics;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// How long a worker may hold a job without heartbeating.
    pub lease_duration: Duration,
    /// Lease expiries tolerated before the job is declared dead.
    pub max_stalled: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            max_stalled: 1,
        }
    }
}

#[derive(Debug)]
enum JobState {
    Ready { at: Instant },
    Leased { deadline: Instant },
    Done,
    Dead,
}

#[derive(Debug)]
struct Entry {
    payload: JobPayload,
    /// 1-based attempt number of the next (or current) execution.
    attempt: u32,
    stalled: u32,
    state: JobState,
}

/// A pulled job. The attempt number counts this execution.
#[derive(Clone, Debug)]
pub struct LeasedJob {
    pub payload: JobPayload,
    pub attempt: u32,
}

#[derive(Default)]
pub struct JobQueue {
    cfg: QueueConfig,
    entries: Mutex<HashMap<JobId, Entry>>,
}

impl JobQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn enqueue(&self, payload: JobPayload) {
        self.enqueue_delayed(payload, Duration::ZERO);
    }

    pub fn enqueue_delayed(&self, payload: JobPayload, delay: Duration) {
        let job_id = payload.job_id;
        let mut entries = self.entries.lock();
        entries.insert(
            job_id,
            Entry {
                payload,
                attempt: 1,
                stalled: 0,
                state: JobState::Ready {
                    at: Instant::now() + delay,
                },
            },
        );
        debug!(target: "dispatcher", job = %job_id, ?delay, "job enqueued");
    }

    /// Pull the ready job that has waited longest, if any. Also returns
    /// expired leases to ready and buries over-stalled jobs, so callers do
    /// not need a separate reaper task.
    pub fn next_ready(&self) -> Option<LeasedJob> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        for (job_id, entry) in entries.iter_mut() {
            if let JobState::Leased { deadline } = entry.state {
                if deadline <= now {
                    entry.stalled += 1;
                    metrics::record_job_stalled();
                    if entry.stalled > self.cfg.max_stalled {
                        warn!(target: "dispatcher", job = %job_id, stalled = entry.stalled,
                              "job stalled too often; burying");
                        entry.state = JobState::Dead;
                    } else {
                        warn!(target: "dispatcher", job = %job_id, "lease expired; requeueing");
                        entry.state = JobState::Ready { at: now };
                    }
                }
            }
        }

        let candidate = entries
            .iter()
            .filter_map(|(job_id, entry)| match entry.state {
                JobState::Ready { at } if at <= now => Some((*job_id, at)),
                _ => None,
            })
            .min_by_key(|(_, at)| *at)
            .map(|(job_id, _)| job_id)?;

        let entry = entries.get_mut(&candidate)?;
        entry.state = JobState::Leased {
            deadline: now + self.cfg.lease_duration,
        };
        Some(LeasedJob {
            payload: entry.payload.clone(),
            attempt: entry.attempt,
        })
    }

    /// Extend the lease of a job still being processed.
    pub fn heartbeat(&self, job_id: JobId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&job_id) {
            if let JobState::Leased { .. } = entry.state {
                entry.state = JobState::Leased {
                    deadline: Instant::now() + self.cfg.lease_duration,
                };
            }
        }
    }

    /// Finish a job. `retain` keeps the entry around in `Done` state for
    /// inspection; otherwise it is removed.
    pub fn ack(&self, job_id: JobId, retain: bool) {
        let mut entries = self.entries.lock();
        if retain {
            if let Some(entry) = entries.get_mut(&job_id) {
                entry.state = JobState::Done;
            }
        } else {
            entries.remove(&job_id);
        }
    }

    /// Schedule the next attempt of a failed job after `delay`. A job that
    /// was buried or finished in the meantime stays that way; otherwise a
    /// worker reporting a late failure would undo `max_stalled`.
    pub fn nack_retry(&self, job_id: JobId, delay: Duration) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&job_id) {
            match entry.state {
                JobState::Ready { .. } | JobState::Leased { .. } => {
                    entry.attempt += 1;
                    entry.state = JobState::Ready {
                        at: Instant::now() + delay,
                    };
                    debug!(target: "dispatcher", job = %job_id, attempt = entry.attempt, ?delay,
                           "retry scheduled");
                }
                JobState::Done | JobState::Dead => {
                    warn!(target: "dispatcher", job = %job_id, state = ?entry.state,
                          "late retry for a settled job ignored");
                }
            }
        }
    }

    /// Jobs neither finished nor buried. Zero means the queue is drained.
    pub fn outstanding(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| matches!(entry.state, JobState::Ready { .. } | JobState::Leased { .. }))
            .count()
    }
}
