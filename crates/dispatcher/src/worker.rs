//! Worker pool draining the job queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use inboxshot_core_types::{ErrorKind, PipelineError, RunId};
use run_store::{RunAggregator, RunStatus, RunStore};

use crate::job::EnqueueOptions;
use crate::metrics;
use crate::pipeline::JobPipeline;
use crate::queue::{JobQueue, LeasedJob};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Jobs processed in parallel per pool.
    pub concurrency: usize,
    /// Idle poll interval when the queue is empty.
    pub poll_interval: Duration,
    /// Polls waiting for the run row to become visible, with doubling
    /// delays starting at `run_poll_base`. Exhausting them fails the job
    /// permanently: a run row that never appears will not appear later.
    pub run_poll_attempts: u32,
    pub run_poll_base: Duration,
    /// How often the lease is renewed while a job executes. Must stay well
    /// under the queue's `lease_duration` or healthy long-running jobs get
    /// reclaimed as stalled.
    pub heartbeat_interval: Duration,
    pub enqueue: EnqueueOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_millis(250),
            run_poll_attempts: 5,
            run_poll_base: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(20),
            enqueue: EnqueueOptions::default(),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    pipeline: Arc<JobPipeline>,
    aggregator: RunAggregator,
    runs: Arc<dyn RunStore>,
    cfg: WorkerConfig,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        pipeline: Arc<JobPipeline>,
        aggregator: RunAggregator,
        runs: Arc<dyn RunStore>,
        cfg: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            aggregator,
            runs,
            cfg,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }

    /// Spawn the worker loops. Each worker pulls one job at a time, so the
    /// pool never runs more than `concurrency` jobs in parallel.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.cfg.concurrency)
            .map(|worker| {
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    info!(target: "dispatcher", worker, "worker started");
                    pool.worker_loop().await;
                    info!(target: "dispatcher", worker, "worker stopped");
                })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// True once nothing is ready or leased. Buried and retained entries do
    /// not count.
    pub fn is_drained(&self) -> bool {
        self.queue.outstanding() == 0
    }

    async fn worker_loop(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.queue.next_ready() {
                Some(job) => self.process(job).await,
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(self.cfg.poll_interval) => {}
                    }
                }
            }
        }
    }

    async fn process(&self, job: LeasedJob) {
        let job_id = job.payload.job_id;
        let run_id = job.payload.run_id;
        metrics::record_job_started();
        info!(target: "dispatcher", job = %job_id, run = %run_id,
              provider = %job.payload.pair.provider, engine = %job.payload.pair.engine,
              attempt = job.attempt, "job active");

        if !self.await_run_row(run_id).await {
            // The producer writes the run row before enqueueing, so an
            // absent row after polling means the run was deleted or the
            // payload is bogus. Retrying cannot help.
            error!(target: "dispatcher", job = %job_id, run = %run_id,
                   "run row never became visible; failing job permanently");
            metrics::record_job_failed();
            self.queue.ack(job_id, self.cfg.enqueue.retain_on_failure);
            return;
        }

        if let Err(err) = self.aggregator.job_started(run_id).await {
            self.fail_or_retry(job, err).await;
            return;
        }

        // The deterministic tier alone can legitimately run past the lease
        // (the locator waits out its 90s deadline on slow mail delivery),
        // so the lease is renewed on a timer for as long as the pipeline
        // runs, and only a worker that actually stopped beating stalls.
        let result = {
            let execute = self.pipeline.execute(&job.payload);
            tokio::pin!(execute);
            loop {
                tokio::select! {
                    result = &mut execute => break result,
                    _ = sleep(self.cfg.heartbeat_interval) => self.queue.heartbeat(job_id),
                }
            }
        };

        match result {
            Ok(()) => {
                metrics::record_job_succeeded();
                info!(target: "dispatcher", job = %job_id, run = %run_id,
                      provider = %job.payload.pair.provider,
                      engine = %job.payload.pair.engine, "job completed");
                match self.aggregator.job_succeeded(run_id).await {
                    Ok(RunStatus::Done) => metrics::record_run_completed(),
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "dispatcher", job = %job_id, run = %run_id,
                              error = %err.message, "artifacts stored but aggregation failed");
                    }
                }
                self.queue.ack(job_id, self.cfg.enqueue.retain_on_success);
            }
            Err(err) => self.fail_or_retry(job, err).await,
        }
    }

    async fn fail_or_retry(&self, job: LeasedJob, err: PipelineError) {
        let job_id = job.payload.job_id;
        let run_id = job.payload.run_id;

        if err.retriable && job.attempt < self.cfg.enqueue.max_attempts {
            let delay = self.cfg.enqueue.backoff_after(job.attempt);
            warn!(target: "dispatcher", job = %job_id, attempt = job.attempt, ?delay,
                  error = %err.message, "job failed; retrying");
            metrics::record_job_retried();
            self.queue.nack_retry(job_id, delay);
            return;
        }

        error!(target: "dispatcher", job = %job_id, run = %run_id,
               provider = %job.payload.pair.provider, engine = %job.payload.pair.engine,
               attempt = job.attempt, error = %err.message, "job failed terminally");
        metrics::record_job_failed();
        let message = format!("{} (attempt {})", err.message, job.attempt);
        match self.aggregator.job_failed_terminally(run_id, &message).await {
            Ok(RunStatus::Error) => metrics::record_run_failed(),
            Ok(_) => {}
            Err(err) if err.kind == ErrorKind::RunMissing => {}
            Err(err) => {
                warn!(target: "dispatcher", run = %run_id, error = %err.message,
                      "failed to record terminal run failure");
            }
        }
        self.queue.ack(job_id, self.cfg.enqueue.retain_on_failure);
    }

    /// Poll for the run row with doubling delays, tolerating replica lag
    /// between the producer's insert and our first read.
    async fn await_run_row(&self, run_id: RunId) -> bool {
        let mut delay = self.cfg.run_poll_base;
        for attempt in 0..self.cfg.run_poll_attempts {
            match self.runs.get_run(run_id).await {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(err) => {
                    warn!(target: "dispatcher", run = %run_id, attempt,
                          error = %err.message, "run lookup failed");
                }
            }
            sleep(delay).await;
            delay *= 2;
        }
        false
    }
}
