use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Source of wall-clock time for trigger computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// key: billing-scheduler -> when a job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once a day at `at`, read in the `utc_offset` timezone.
    Daily {
        at: NaiveTime,
        utc_offset: FixedOffset,
    },
    /// Every `every`, optionally firing once as soon as the scheduler starts.
    Interval {
        every: StdDuration,
        run_immediately: bool,
    },
}

impl Cadence {
    pub fn initial_delay(&self, now: DateTime<Utc>) -> StdDuration {
        match *self {
            Cadence::Daily { at, utc_offset } => until(now, next_daily_run(now, at, utc_offset)),
            Cadence::Interval {
                every,
                run_immediately,
            } => {
                if run_immediately {
                    StdDuration::ZERO
                } else {
                    every
                }
            }
        }
    }

    /// Delay until the following run, given when the last run started.
    pub fn next_delay(&self, started: DateTime<Utc>, now: DateTime<Utc>) -> StdDuration {
        match *self {
            // A run that woke slightly early still counts as that day's trigger.
            Cadence::Daily { at, utc_offset } => until(
                now,
                next_daily_run(started.max(now) + Duration::minutes(1), at, utc_offset),
            ),
            Cadence::Interval { every, .. } => every,
        }
    }
}

/// First instant strictly after `now` whose local time in `utc_offset` equals `at`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, utc_offset: FixedOffset) -> DateTime<Utc> {
    let local_today = now.with_timezone(&utc_offset).date_naive().and_time(at);
    let shift = Duration::seconds(i64::from(utc_offset.local_minus_utc()));
    let candidate = Utc.from_utc_datetime(&(local_today - shift));
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn until(now: DateTime<Utc>, target: DateTime<Utc>) -> StdDuration {
    (target - now).to_std().unwrap_or(StdDuration::ZERO)
}

/// key: billing-scheduler -> unit of recurring work
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()>;
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// key: billing-scheduler -> background task lifecycle
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    jobs: Vec<(Cadence, Arc<dyn ScheduledJob>)>,
    running: Option<Running>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
            running: None,
        }
    }

    pub fn with_job(mut self, cadence: Cadence, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.push((cadence, job));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawns one task per job. Calling it again while running does nothing.
    pub fn start(&mut self) {
        if self.running.is_some() {
            debug!("billing scheduler already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = self
            .jobs
            .iter()
            .map(|(cadence, job)| {
                tokio::spawn(run_job(
                    self.clock.clone(),
                    *cadence,
                    job.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(jobs = self.jobs.len(), "billing scheduler started");
        self.running = Some(Running { shutdown, handles });
    }

    /// Signals every job task and waits for them to exit. In-flight runs finish first.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for handle in running.handles {
            if let Err(err) = handle.await {
                warn!(?err, "billing scheduler task ended abnormally");
            }
        }
        info!("billing scheduler stopped");
    }
}

async fn run_job(
    clock: Arc<dyn Clock>,
    cadence: Cadence,
    job: Arc<dyn ScheduledJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = cadence.initial_delay(clock.now());
    debug!(job = job.name(), ?delay, "first run scheduled");

    loop {
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }

        let started = clock.now();
        match job.run(started).await {
            Ok(()) => debug!(job = job.name(), "scheduled job finished"),
            Err(err) => warn!(?err, job = job.name(), "scheduled job failed"),
        }

        delay = cadence.next_delay(started, clock.now());
    }

    debug!(job = job.name(), "scheduled job task exiting");
}
