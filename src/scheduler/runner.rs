//! Background scheduler driving rules on their cron schedules

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::Instrument;

use super::cron::{CronSchedule, ScheduleError};
use crate::alerts::AlertDispatcher;
use crate::monitor::evaluator::panic_message;
use crate::monitor::{Monitor, MonitorError, MonitorResult, Rule};

/// Scheduler timing
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub poll_interval: Duration,
    /// Pause after a failed tick
    pub error_backoff: Duration,
    /// How long `stop` waits for the loop to exit
    pub stop_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    /// Rules seen for the first time and given a next-run time
    pub scheduled: Vec<String>,
    /// Rules that were due and ran
    pub ran: Vec<String>,
    /// Rules whose schedule could not be computed or whose run was rejected
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    expr: String,
    next_run: DateTime<Utc>,
}

struct Shared {
    monitor: Arc<Monitor>,
    dispatcher: Arc<AlertDispatcher>,
    next_runs: Mutex<HashMap<String, ScheduleEntry>>,
}

/// One tick of the loop, given the tick's timestamp
type TickFn = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, TickSummary> + Send + Sync>;

struct RunningTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    /// Closed when the loop future is dropped
    exited: watch::Receiver<()>,
    /// Set once `stop` has signalled this loop
    stopping: bool,
}

/// Runs scheduled rules on a single background task
pub struct MonitorScheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
    tick: TickFn,
    task: Mutex<Option<RunningTask>>,
}

impl MonitorScheduler {
    pub fn new(monitor: Arc<Monitor>, dispatcher: Arc<AlertDispatcher>) -> Self {
        Self::with_config(monitor, dispatcher, SchedulerConfig::default())
    }

    pub fn with_config(
        monitor: Arc<Monitor>,
        dispatcher: Arc<AlertDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            monitor,
            dispatcher,
            next_runs: Mutex::new(HashMap::new()),
        });
        let tick_shared = Arc::clone(&shared);
        let tick: TickFn = Arc::new(move |now| {
            let shared = Arc::clone(&tick_shared);
            async move { shared.tick(now).await }.boxed()
        });

        Self {
            shared,
            config,
            tick,
            task: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_tick(mut self, tick: TickFn) -> Self {
        self.tick = tick;
        self
    }

    /// `Running` until the background loop has actually exited
    pub fn state(&self) -> SchedulerState {
        match self.task.lock().as_ref() {
            Some(task) if !task.handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Start the tick loop; returns false if a loop is still running or stopping
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if let Some(current) = task.as_ref().filter(|t| !t.handle.is_finished()) {
            if current.stopping {
                tracing::warn!("Scheduler is still stopping, not starting another loop");
            } else {
                tracing::warn!("Scheduler is already running");
            }
            return false;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (exited_tx, exited) = watch::channel(());
        let handle = tokio::spawn(
            run_loop(Arc::clone(&self.tick), self.config.clone(), shutdown_rx, exited_tx)
                .instrument(tracing::info_span!("scheduler")),
        );

        *task = Some(RunningTask {
            shutdown_tx,
            handle,
            exited,
            stopping: false,
        });
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Scheduler started"
        );
        true
    }

    /// Signal the loop to exit and wait (bounded) for it
    ///
    /// A tick in progress runs to completion first. If it outlasts the stop
    /// timeout the loop is left to finish that tick and exit on its own;
    /// until then `start` refuses to spawn another loop.
    pub async fn stop(&self) {
        let mut exited = {
            let mut slot = self.task.lock();
            let Some(task) = slot.as_mut() else {
                return;
            };
            if task.handle.is_finished() {
                *slot = None;
                return;
            }
            task.stopping = true;
            let _ = task.shutdown_tx.try_send(());
            task.exited.clone()
        };

        // Never sent on, so this resolves once the loop drops its sender
        match tokio::time::timeout(self.config.stop_timeout, exited.changed()).await {
            Ok(_) => {
                let mut slot = self.task.lock();
                if slot.as_ref().is_some_and(|t| t.stopping) {
                    *slot = None;
                }
                tracing::info!("Scheduler stopped");
            }
            Err(_) => tracing::warn!(
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "Scheduler tick still in progress, loop will exit when it completes"
            ),
        }
    }

    /// Evaluate a rule now, dispatching if triggered
    ///
    /// Does not touch the rule's scheduled next run.
    pub async fn trigger_now(&self, rule_name: &str) -> Result<MonitorResult, MonitorError> {
        tracing::info!(rule = %rule_name, "Manually triggering rule");
        let rule = self
            .shared
            .monitor
            .get_rule(rule_name)
            .ok_or_else(|| MonitorError::RuleNotFound(rule_name.to_string()))?;
        self.shared.execute(&rule).await
    }

    /// The recorded next run, if a tick has observed the rule
    pub fn get_next_run_time(&self, rule_name: &str) -> Option<DateTime<Utc>> {
        self.shared
            .next_runs
            .lock()
            .get(rule_name)
            .map(|entry| entry.next_run)
    }

    /// Run one tick as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        self.shared.tick(now).await
    }
}

impl Shared {
    async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let rules: Vec<Rule> = self
            .monitor
            .list_rules()
            .into_iter()
            .filter(|r| r.enabled && r.schedule_expr().is_some())
            .collect();

        self.next_runs
            .lock()
            .retain(|name, _| rules.iter().any(|r| &r.name == name));

        let mut summary = TickSummary::default();
        for rule in rules {
            match self.due(&rule, now) {
                Ok(Due::FirstSeen) => summary.scheduled.push(rule.name.clone()),
                Ok(Due::Later) => {}
                Ok(Due::Now) => {
                    tracing::info!(rule = %rule.name, "Running scheduled rule");
                    match self.execute(&rule).await {
                        Ok(_) => summary.ran.push(rule.name.clone()),
                        Err(e) => {
                            tracing::error!(rule = %rule.name, error = %e, "Scheduled run rejected");
                            summary.errors.push(rule.name.clone());
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(rule = %rule.name, error = %e, "Cannot compute next run");
                    summary.errors.push(rule.name.clone());
                }
            }
        }
        summary
    }

    /// Decide due-ness and advance the rule's next run from `now`
    fn due(&self, rule: &Rule, now: DateTime<Utc>) -> Result<Due, ScheduleError> {
        let expr = rule.schedule_expr().unwrap_or_default();
        let mut next_runs = self.next_runs.lock();

        let due = match next_runs.get(&rule.name) {
            Some(entry) if entry.expr == expr && now < entry.next_run => return Ok(Due::Later),
            Some(entry) if entry.expr == expr => Due::Now,
            // Unseen, or the schedule changed since it was recorded
            _ => Due::FirstSeen,
        };

        let next_run = CronSchedule::parse(expr)?
            .next_after(now)
            .ok_or_else(|| ScheduleError::Exhausted(expr.to_string()))?;
        next_runs.insert(
            rule.name.clone(),
            ScheduleEntry {
                expr: expr.to_string(),
                next_run,
            },
        );
        Ok(due)
    }

    async fn execute(&self, rule: &Rule) -> Result<MonitorResult, MonitorError> {
        let result = self.monitor.run(rule).await?;
        if result.triggered {
            let report = self.dispatcher.dispatch(rule, &result).await;
            tracing::debug!(
                rule = %rule.name,
                channels = report.outcomes.len(),
                failures = report.failures(),
                "Alert dispatched"
            );
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    FirstSeen,
    Later,
    Now,
}

async fn run_loop(
    tick: TickFn,
    config: SchedulerConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
    _exited: watch::Sender<()>,
) {
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Shutdown first: a slow tick leaves the ticker ready as well
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {}
        }

        let outcome = AssertUnwindSafe(tick(Utc::now())).catch_unwind().await;

        if let Err(panic) = outcome {
            let error = SchedulerError::TickPanicked(panic_message(panic));
            tracing::error!(
                error = %error,
                backoff_ms = config.error_backoff.as_millis() as u64,
                "Scheduler tick failed, backing off"
            );
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = sleep(config.error_backoff) => {}
            }
            ticker.reset();
        }
    }

    tracing::info!("Scheduler loop exited");
}

/// Scheduler infrastructure errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Tick panicked: {0}")]
    TickPanicked(String),
}
