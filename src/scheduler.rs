//! Cycle scheduler — fires the warm-up, reply and daily-reset jobs.
//!
//! Each job gets a driver task that sleeps until its next due time and
//! spawns the firing onto the runtime's worker pool. A firing that would
//! overlap a still-running one of the same job is skipped, a firing later
//! than the grace period is treated as missed, and missed ticks collapse
//! into the next one. Failures and panics are caught per firing and
//! reported as events.
//!
//! Lifecycle: `Stopped -> Running` (start), `Running -> Stopped` (stop),
//! anything `-> ShutDown` (terminal).

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityLogger, SYSTEM_ACCOUNT};
use crate::engine::{ReplyCycle, WarmupCycle};
use crate::error::{Error, SchedulerError};
use crate::events::{EventKind, EventSink};
use crate::store::AccountStore;

pub const WARMUP_JOB: &str = "warmup_cycle";
pub const REPLY_JOB: &str = "reply_cycle";
pub const RESET_JOB: &str = "daily_reset";

/// Default late-firing tolerance.
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(120);

/// Daily reset at 00:00:30 local time.
pub const DEFAULT_RESET_CRON: &str = "30 0 0 * * *";

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed period; the first firing is one period after start.
    Every(Duration),
    /// Cron expression (with seconds), evaluated in local time.
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    pub fn cron(expr: &str) -> Result<Self, SchedulerError> {
        cron::Schedule::from_str(expr)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| SchedulerError::InvalidSchedule(format!("{expr}: {e}")))
    }

    /// First due instant after `after`. `None` when a cron schedule has no
    /// future occurrence.
    fn next_due(&self, after: Instant) -> Option<Instant> {
        match self {
            Self::Every(period) => Some(after + *period),
            Self::Cron(schedule) => {
                let now = Local::now();
                let next = schedule.after(&now).next()?;
                let wait = (next - now).to_std().unwrap_or_default();
                Some(Instant::now() + wait)
            }
        }
    }

    /// Advance a missed or completed due time past `now`.
    fn advance(&self, due: Instant, now: Instant) -> Option<Instant> {
        match self {
            Self::Every(period) if !period.is_zero() => {
                let mut next = due + *period;
                while next <= now {
                    next += *period;
                }
                Some(next)
            }
            Self::Every(period) => Some(now + *period),
            Self::Cron(_) => self.next_due(now),
        }
    }
}

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    ShutDown,
}

struct JobSlot {
    job: Arc<dyn Job>,
    trigger: Trigger,
    running: AtomicBool,
    next_fire: Mutex<Option<DateTime<Local>>>,
}

impl JobSlot {
    fn set_next_fire(&self, due: Option<Instant>) {
        let wall = due.map(|d| {
            let wait = d.saturating_duration_since(Instant::now());
            Local::now() + chrono::Duration::from_std(wait).unwrap_or_default()
        });
        if let Ok(mut slot) = self.next_fire.lock() {
            *slot = wall;
        }
    }
}

pub struct CycleScheduler {
    slots: Vec<Arc<JobSlot>>,
    state: watch::Sender<SchedulerState>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
    events: EventSink,
    grace: Duration,
}

impl CycleScheduler {
    pub fn new(events: EventSink) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            slots: Vec::new(),
            state,
            drivers: Mutex::new(Vec::new()),
            events,
            grace: DEFAULT_MISFIRE_GRACE,
        }
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Register a job. Jobs are fixed once the scheduler has started.
    pub fn with_job(mut self, job: Arc<dyn Job>, trigger: Trigger) -> Self {
        self.slots.push(Arc::new(JobSlot {
            job,
            trigger,
            running: AtomicBool::new(false),
            next_fire: Mutex::new(None),
        }));
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Next scheduled firing of `job`, if running and known.
    pub fn next_fire(&self, job: &str) -> Option<DateTime<Local>> {
        if !self.is_running() {
            return None;
        }
        self.slots
            .iter()
            .find(|s| s.job.name() == job)
            .and_then(|s| s.next_fire.lock().ok().and_then(|n| *n))
    }

    /// Start or resume firing. Idempotent while running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::ShutDown => return Err(SchedulerError::ShutDown),
            SchedulerState::Running => return Ok(()),
            SchedulerState::Stopped => {}
        }

        {
            let mut drivers = self.drivers.lock().map_err(|_| SchedulerError::ShutDown)?;
            if drivers.is_empty() {
                for slot in &self.slots {
                    drivers.push(tokio::spawn(drive(
                        Arc::clone(slot),
                        self.state.subscribe(),
                        self.events.clone(),
                        self.grace,
                    )));
                }
            }
        }

        self.state.send_replace(SchedulerState::Running);
        info!(jobs = self.slots.len(), "Scheduler started");
        self.events
            .emit(EventKind::Status, SYSTEM_ACCOUNT, "Scheduler started");
        Ok(())
    }

    /// Suspend firing. In-flight firings finish normally.
    pub fn stop(&self) {
        if self.state() != SchedulerState::Running {
            return;
        }
        self.state.send_replace(SchedulerState::Stopped);
        info!("Scheduler stopped");
        self.events
            .emit(EventKind::Status, SYSTEM_ACCOUNT, "Scheduler stopped");
    }

    /// Stop permanently. In-flight firings are not cancelled.
    pub fn shutdown(&self) {
        if self.state() == SchedulerState::ShutDown {
            return;
        }
        self.state.send_replace(SchedulerState::ShutDown);
        if let Ok(mut drivers) = self.drivers.lock() {
            for driver in drivers.drain(..) {
                driver.abort();
            }
        }
        info!("Scheduler shut down");
        self.events
            .emit(EventKind::Status, SYSTEM_ACCOUNT, "Scheduler shut down");
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        if let Ok(mut drivers) = self.drivers.lock() {
            for driver in drivers.drain(..) {
                driver.abort();
            }
        }
    }
}

/// Per-job driver loop.
async fn drive(
    slot: Arc<JobSlot>,
    mut state: watch::Receiver<SchedulerState>,
    events: EventSink,
    grace: Duration,
) {
    let name = slot.job.name().to_string();
    let mut due = slot.trigger.next_due(Instant::now());

    loop {
        let current = *state.borrow_and_update();
        match current {
            SchedulerState::ShutDown => break,
            SchedulerState::Stopped => {
                if state.changed().await.is_err() {
                    break;
                }
                continue;
            }
            SchedulerState::Running => {}
        }

        let Some(at) = due else {
            warn!(job = %name, "No future firing time, driver idle");
            if state.changed().await.is_err() {
                break;
            }
            continue;
        };
        slot.set_next_fire(Some(at));

        tokio::select! {
            _ = tokio::time::sleep_until(at) => {}
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if *state.borrow() != SchedulerState::Running {
            continue;
        }

        let now = Instant::now();
        let lateness = now.saturating_duration_since(at);
        if lateness > grace {
            warn!(job = %name, late_secs = lateness.as_secs(), "Missed firing, skipping");
        } else {
            fire(&slot, &events);
        }
        due = slot.trigger.advance(at, now);
    }

    debug!(job = %name, "Driver exiting");
}

/// Spawn one firing unless the previous one is still running.
fn fire(slot: &Arc<JobSlot>, events: &EventSink) {
    let name = slot.job.name().to_string();
    if slot.running.swap(true, Ordering::AcqRel) {
        debug!(job = %name, "Previous firing still running, skipping");
        return;
    }

    let slot = Arc::clone(slot);
    let events = events.clone();
    tokio::spawn(async move {
        let job = Arc::clone(&slot.job);
        let outcome = tokio::spawn(async move { job.run().await }).await;
        match outcome {
            Ok(Ok(())) => debug!(job = %name, "Job finished"),
            Ok(Err(e)) => {
                error!(job = %name, "Job failed: {e}");
                events.emit(
                    EventKind::Error,
                    SYSTEM_ACCOUNT,
                    format!("Job {name} error: {e}"),
                );
            }
            Err(e) => {
                error!(job = %name, "Job panicked: {e}");
                events.emit(
                    EventKind::Error,
                    SYSTEM_ACCOUNT,
                    format!("Job {name} error: {e}"),
                );
            }
        }
        slot.running.store(false, Ordering::Release);
    });
}

// ── Jobs ────────────────────────────────────────────────────────────

pub struct WarmupJob(pub Arc<WarmupCycle>);

#[async_trait]
impl Job for WarmupJob {
    fn name(&self) -> &str {
        WARMUP_JOB
    }

    async fn run(&self) -> Result<(), Error> {
        self.0.run().await.map(|_| ())
    }
}

pub struct ReplyJob(pub Arc<ReplyCycle>);

#[async_trait]
impl Job for ReplyJob {
    fn name(&self) -> &str {
        REPLY_JOB
    }

    async fn run(&self) -> Result<(), Error> {
        self.0.run().await.map(|_| ())
    }
}

/// Zeroes every account's daily counter and recomputes its limit.
pub struct ResetJob {
    accounts: Arc<dyn AccountStore>,
    activity: ActivityLogger,
    events: EventSink,
}

impl ResetJob {
    pub fn new(accounts: Arc<dyn AccountStore>, activity: ActivityLogger, events: EventSink) -> Self {
        Self {
            accounts,
            activity,
            events,
        }
    }
}

#[async_trait]
impl Job for ResetJob {
    fn name(&self) -> &str {
        RESET_JOB
    }

    async fn run(&self) -> Result<(), Error> {
        let count = self.accounts.reset_daily_counts().await?;
        info!(accounts = count, "Daily counters reset");
        self.activity.reset(count).await;
        self.events.emit(
            EventKind::Reset,
            SYSTEM_ACCOUNT,
            format!("Daily counters reset for {count} accounts"),
        );
        Ok(())
    }
}

/// Cadences for the three standard jobs.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub warmup_every: Duration,
    pub reply_every: Duration,
    pub reset: Trigger,
    pub misfire_grace: Duration,
}

impl ScheduleSettings {
    pub fn new(reset_cron: &str) -> Result<Self, SchedulerError> {
        Ok(Self {
            warmup_every: Duration::from_secs(60),
            reply_every: Duration::from_secs(300),
            reset: Trigger::cron(reset_cron)?,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
        })
    }
}

impl CycleScheduler {
    /// Scheduler with the warm-up, reply and daily-reset jobs.
    pub fn standard(
        settings: ScheduleSettings,
        warmup: Arc<WarmupCycle>,
        reply: Arc<ReplyCycle>,
        reset: ResetJob,
        events: EventSink,
    ) -> Self {
        Self::new(events)
            .with_misfire_grace(settings.misfire_grace)
            .with_job(
                Arc::new(WarmupJob(warmup)),
                Trigger::Every(settings.warmup_every),
            )
            .with_job(Arc::new(ReplyJob(reply)), Trigger::Every(settings.reply_every))
            .with_job(Arc::new(reset), settings.reset)
    }
}
