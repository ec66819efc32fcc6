//! In-process job queue for scans and per-service checks.
//!
//! [`JobQueue::new`] hands out two capabilities. [`JobEnqueuer`] can only put
//! work on the queue and is what request and record-mutation paths hold.
//! [`JobRunner`] executes queued work and is owned by the scheduler and
//! operator "run now" calls. Only one drain runs at a time.

use chrono::Utc;
use dashmap::DashSet;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::monitor::check_task::{self, CheckOutcome, ServiceLocks};
use crate::monitor::scan::{self, ScanSummary};
use crate::monitor::{MonitorContext, MonitorError};

pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 16;
pub const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Scan,
    Check(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub max_concurrent: usize,
    pub max_attempts: u32,
    /// Multiplied by the attempt number before a retry.
    pub retry_backoff: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_CHECKS,
            max_attempts: DEFAULT_MAX_JOB_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

pub struct JobQueue;

impl JobQueue {
    pub fn new(options: JobOptions) -> (JobEnqueuer, JobRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        let enqueuer = JobEnqueuer {
            tx,
            pending_checks: Arc::new(DashSet::new()),
            scan_pending: Arc::new(AtomicBool::new(false)),
        };
        let runner = JobRunner {
            rx: Mutex::new(rx),
            enqueuer: enqueuer.clone(),
            locks: ServiceLocks::new(),
            options: JobOptions {
                max_concurrent: options.max_concurrent.max(1),
                max_attempts: options.max_attempts.max(1),
                ..options
            },
        };
        (enqueuer, runner)
    }
}

/// Enqueue-only handle. Cheap to clone.
#[derive(Clone)]
pub struct JobEnqueuer {
    tx: UnboundedSender<Job>,
    pending_checks: Arc<DashSet<i32>>,
    scan_pending: Arc<AtomicBool>,
}

impl JobEnqueuer {
    /// Queues a scan unless one is already waiting. Returns whether a job was added.
    pub fn enqueue_scan(&self) -> bool {
        if self.scan_pending.swap(true, Ordering::SeqCst) {
            return false;
        }
        let queued = self.send(Job {
            kind: JobKind::Scan,
            attempt: 1,
        });
        if !queued {
            self.scan_pending.store(false, Ordering::SeqCst);
        }
        queued
    }

    /// Queues a check unless one for the same service is already waiting.
    pub fn enqueue_check(&self, service_id: i32) -> bool {
        if !self.pending_checks.insert(service_id) {
            debug!(service_id, "Check already queued.");
            return false;
        }
        let queued = self.send(Job {
            kind: JobKind::Check(service_id),
            attempt: 1,
        });
        if !queued {
            self.pending_checks.remove(&service_id);
        }
        queued
    }

    /// Number of checks waiting to be drained.
    pub fn pending_checks(&self) -> usize {
        self.pending_checks.len()
    }

    fn send(&self, job: Job) -> bool {
        match self.tx.send(job) {
            Ok(()) => true,
            Err(e) => {
                warn!(job = ?e.0.kind, "Job queue is closed, dropping job.");
                false
            }
        }
    }

    fn mark_taken(&self, job: &Job) {
        match job.kind {
            JobKind::Scan => self.scan_pending.store(false, Ordering::SeqCst),
            JobKind::Check(id) => {
                self.pending_checks.remove(&id);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub scans: usize,
    pub checks: usize,
    pub failures: usize,
    pub retried: usize,
}

enum JobResult {
    Done,
    Failed { error: MonitorError, retryable: bool },
}

/// Drain handle. Holds the receiving end of the queue.
pub struct JobRunner {
    rx: Mutex<UnboundedReceiver<Job>>,
    enqueuer: JobEnqueuer,
    locks: ServiceLocks,
    options: JobOptions,
}

impl JobRunner {
    /// Drains the queue, waiting for any drain already in flight to finish first.
    pub async fn drain(&self, ctx: &MonitorContext) -> DrainReport {
        let mut rx = self.rx.lock().await;
        self.drain_locked(&mut rx, ctx).await
    }

    /// Drains the queue, or returns `None` if another drain is in flight.
    pub async fn try_drain(&self, ctx: &MonitorContext) -> Option<DrainReport> {
        let mut rx = self.rx.try_lock().ok()?;
        Some(self.drain_locked(&mut rx, ctx).await)
    }

    /// Queues a scan and drains, unless a drain is already in flight.
    pub async fn run_scan_if_idle(&self, ctx: &MonitorContext) -> Option<DrainReport> {
        let mut rx = self.rx.try_lock().ok()?;
        self.enqueuer.enqueue_scan();
        Some(self.drain_locked(&mut rx, ctx).await)
    }

    /// Scans immediately and waits for every queued check to finish.
    pub async fn run_scan_now(
        &self,
        ctx: &MonitorContext,
    ) -> Result<(ScanSummary, DrainReport), MonitorError> {
        let mut rx = self.rx.lock().await;
        let summary = scan::run_scan(ctx.store.as_ref(), &self.enqueuer, Utc::now()).await?;
        let mut report = self.drain_locked(&mut rx, ctx).await;
        report.scans += 1;
        Ok((summary, report))
    }

    /// Checks one service immediately, outside the queue.
    pub async fn run_check_now(
        &self,
        ctx: &MonitorContext,
        service_id: i32,
    ) -> Result<CheckOutcome, MonitorError> {
        let outcome = check_task::check_service(ctx.store.as_ref(), &self.locks, service_id).await;
        match outcome {
            CheckOutcome::StoreFailure { error } => Err(error.into()),
            outcome => Ok(outcome),
        }
    }

    async fn drain_locked(
        &self,
        rx: &mut UnboundedReceiver<Job>,
        ctx: &MonitorContext,
    ) -> DrainReport {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent));
        let mut tasks: JoinSet<(Job, JobResult)> = JoinSet::new();
        let mut report = DrainReport::default();

        loop {
            while let Ok(job) = rx.try_recv() {
                self.enqueuer.mark_taken(&job);
                self.spawn_job(&mut tasks, &semaphore, ctx, job, Duration::ZERO);
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (job, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Monitoring job panicked or was cancelled.");
                    report.failures += 1;
                    continue;
                }
            };

            match result {
                JobResult::Done => match job.kind {
                    JobKind::Scan => report.scans += 1,
                    JobKind::Check(_) => report.checks += 1,
                },
                JobResult::Failed { error, retryable } => {
                    if retryable && job.attempt < self.options.max_attempts {
                        let delay = self.options.retry_backoff * job.attempt;
                        warn!(
                            job = ?job.kind,
                            attempt = job.attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %error,
                            "Monitoring job failed, retrying."
                        );
                        report.retried += 1;
                        let retry = Job {
                            kind: job.kind,
                            attempt: job.attempt + 1,
                        };
                        self.spawn_job(&mut tasks, &semaphore, ctx, retry, delay);
                    } else {
                        error!(
                            job = ?job.kind,
                            attempt = job.attempt,
                            error = %error,
                            "Monitoring job failed."
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        if report != DrainReport::default() {
            info!(
                scans = report.scans,
                checks = report.checks,
                failures = report.failures,
                retried = report.retried,
                "Job queue drained."
            );
        }
        report
    }

    fn spawn_job(
        &self,
        tasks: &mut JoinSet<(Job, JobResult)>,
        semaphore: &Arc<Semaphore>,
        ctx: &MonitorContext,
        job: Job,
        delay: Duration,
    ) {
        let semaphore = semaphore.clone();
        let ctx = ctx.clone();
        let locks = self.locks.clone();
        let enqueuer = self.enqueuer.clone();

        tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (
                    job,
                    JobResult::Failed {
                        error: MonitorError::ContextUnavailable("job semaphore closed".to_string()),
                        retryable: false,
                    },
                );
            };
            let result = execute(job.kind, &ctx, &locks, &enqueuer).await;
            (job, result)
        });
    }
}

async fn execute(
    kind: JobKind,
    ctx: &MonitorContext,
    locks: &ServiceLocks,
    enqueuer: &JobEnqueuer,
) -> JobResult {
    match kind {
        JobKind::Scan => match scan::run_scan(ctx.store.as_ref(), enqueuer, Utc::now()).await {
            Ok(_) => JobResult::Done,
            Err(error) => JobResult::Failed {
                retryable: error.is_retryable(),
                error: error.into(),
            },
        },
        JobKind::Check(service_id) => {
            match check_task::check_service(ctx.store.as_ref(), locks, service_id).await {
                CheckOutcome::StoreFailure { error } => JobResult::Failed {
                    retryable: error.is_retryable(),
                    error: error.into(),
                },
                _ => JobResult::Done,
            }
        }
    }
}
