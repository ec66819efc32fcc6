//! Cron-driven scheduler lifecycle.
//!
//! The scheduler owns at most one timer task. Each firing acquires a fresh
//! host context, queues a scan and drains the queue, so all checks found due
//! by that scan finish before the firing does. A firing that finds a drain
//! still in flight is skipped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::monitor::cron::{CronError, CronSchedule};
use crate::monitor::host::ContextProvider;
use crate::monitor::jobs::JobRunner;
use crate::monitor::{MonitorContext, MonitorError};

pub const DEFAULT_SCHEDULE: &str = "* * * * *";

/// Bound on how long startup or a firing waits for the host context.
const CONTEXT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub schedule: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

impl SchedulerStatus {
    fn stopped() -> Self {
        Self {
            running: false,
            schedule: None,
            next_run: None,
        }
    }
}

struct ActiveTimer {
    schedule: CronSchedule,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ActiveTimer {
    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: true,
            schedule: Some(self.schedule.expression().to_string()),
            next_run: self.schedule.next_after(Utc::now()),
        }
    }
}

pub struct Scheduler {
    runner: Arc<JobRunner>,
    provider: Arc<dyn ContextProvider>,
    default_schedule: Option<String>,
    acquire_timeout: Duration,
    timer: Mutex<Option<ActiveTimer>>,
}

impl Scheduler {
    pub fn new(runner: Arc<JobRunner>, provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            runner,
            provider,
            default_schedule: None,
            acquire_timeout: CONTEXT_ACQUIRE_TIMEOUT,
            timer: Mutex::new(None),
        }
    }

    /// Schedule used when neither the caller nor the global settings name one.
    pub fn with_default_schedule(mut self, schedule: Option<String>) -> Self {
        self.default_schedule = schedule.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Starts the timer.
    ///
    /// The schedule is, in order: `schedule`, the global settings, the
    /// configured default, then every minute. Global settings are read from
    /// `provided` when given, which is how the host must call this from its
    /// startup hook. An invalid expression fails before anything is
    /// registered. Starting an already running scheduler is a no-op.
    pub async fn start(
        &self,
        schedule: Option<&str>,
        provided: Option<&MonitorContext>,
    ) -> Result<SchedulerStatus, MonitorError> {
        let mut timer = self.timer.lock().await;
        if let Some(active) = timer.as_ref() {
            info!(schedule = %active.schedule, "Monitoring scheduler already running.");
            return Ok(active.status());
        }

        let expression = match schedule.map(str::trim).filter(|s| !s.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None => match self.settings_schedule(provided).await {
                SettingsSchedule::Disabled => {
                    info!("Monitoring is disabled in global settings, scheduler not started.");
                    return Ok(SchedulerStatus::stopped());
                }
                SettingsSchedule::Expression(expression) => expression,
                SettingsSchedule::Unset => self
                    .default_schedule
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            },
        };

        let cron = CronSchedule::parse(&expression)?;
        if cron.next_after(Utc::now()).is_none() {
            return Err(CronError::NeverFires(expression).into());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(
            cron.clone(),
            self.runner.clone(),
            self.provider.clone(),
            self.acquire_timeout,
            shutdown_rx,
        ));
        let active = ActiveTimer {
            schedule: cron,
            handle,
            shutdown_tx,
        };
        let status = active.status();
        *timer = Some(active);

        info!(schedule = %expression, "Monitoring scheduler started.");
        Ok(status)
    }

    /// Stops the timer. Firings already in progress run to completion.
    /// Returns whether a timer was running.
    pub async fn stop(&self) -> bool {
        let Some(active) = self.timer.lock().await.take() else {
            debug!("Monitoring scheduler already stopped.");
            return false;
        };
        let _ = active.shutdown_tx.send(true);
        active.handle.abort();
        info!(schedule = %active.schedule, "Monitoring scheduler stopped.");
        true
    }

    pub async fn restart(
        &self,
        schedule: Option<&str>,
        provided: Option<&MonitorContext>,
    ) -> Result<SchedulerStatus, MonitorError> {
        self.stop().await;
        self.start(schedule, provided).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        match self.timer.lock().await.as_ref() {
            Some(active) => active.status(),
            None => SchedulerStatus::stopped(),
        }
    }

    async fn settings_schedule(&self, provided: Option<&MonitorContext>) -> SettingsSchedule {
        let ctx = match provided {
            Some(ctx) => ctx.clone(),
            None => match tokio::time::timeout(self.acquire_timeout, self.provider.acquire()).await {
                Ok(Ok(ctx)) => ctx,
                Ok(Err(e)) => {
                    warn!(error = %e, "Could not acquire context to read monitoring settings.");
                    return SettingsSchedule::Unset;
                }
                Err(_) => {
                    warn!("Timed out acquiring context to read monitoring settings.");
                    return SettingsSchedule::Unset;
                }
            },
        };

        match ctx.store.find_global_settings().await {
            Ok(settings) if !settings.enabled => SettingsSchedule::Disabled,
            Ok(settings) => settings
                .schedule_expression
                .filter(|s| !s.trim().is_empty())
                .map_or(SettingsSchedule::Unset, SettingsSchedule::Expression),
            Err(e) => {
                warn!(error = %e, "Failed to read monitoring settings, using default schedule.");
                SettingsSchedule::Unset
            }
        }
    }
}

enum SettingsSchedule {
    Disabled,
    Expression(String),
    Unset,
}

async fn run_timer(
    schedule: CronSchedule,
    runner: Arc<JobRunner>,
    provider: Arc<dyn ContextProvider>,
    acquire_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_fire = Utc::now();
    loop {
        let now = Utc::now().max(last_fire);
        let Some(next) = schedule.next_after(now) else {
            warn!(schedule = %schedule, "Schedule has no further firings, timer exiting.");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }
        last_fire = next;

        let span = info_span!("monitor_run", run_id = %Uuid::new_v4(), scheduled_for = %next);
        tokio::spawn(
            fire(runner.clone(), provider.clone(), acquire_timeout).instrument(span),
        );
    }
}

async fn fire(runner: Arc<JobRunner>, provider: Arc<dyn ContextProvider>, acquire_timeout: Duration) {
    let ctx = match tokio::time::timeout(acquire_timeout, provider.acquire()).await {
        Ok(Ok(ctx)) => ctx,
        Ok(Err(e)) => {
            error!(error = %e, "Scheduled monitoring run could not acquire a context.");
            return;
        }
        Err(_) => {
            warn!("Scheduled monitoring run timed out waiting for the host context.");
            return;
        }
    };

    match runner.run_scan_if_idle(&ctx).await {
        Some(report) => debug!(
            checks = report.checks,
            failures = report.failures,
            "Scheduled monitoring run finished."
        ),
        None => warn!("Previous monitoring run still in progress, skipping this firing."),
    }
}
