//! The tick loop: read sensors, advance each door's escalation state,
//! hand fired alerts to the dispatch pool, log a periodic heartbeat.
//!
//! All door state is owned here and mutated from this task only. Status
//! readers get a copy through a `watch` channel published after every
//! tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use doorwatch_core::status::{heartbeat_line, DoorSnapshot};
use doorwatch_core::{DoorConfig, DoorMonitor, FiredAlert, Timestamp};
use doorwatch_events::{AlertContext, DispatchPool};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::health::HealthCollector;
use crate::sensor::{SensorError, SensorReader};

/// When heartbeat lines are logged, counted in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSchedule {
    /// Ticks before the first heartbeat after startup.
    pub initial_ticks: u32,
    /// Ticks between later heartbeats.
    pub interval_ticks: u32,
}

impl Default for HeartbeatSchedule {
    fn default() -> Self {
        Self {
            initial_ticks: 5,
            interval_ticks: 600,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Alerts handed to the dispatch pool, in door order.
    pub fired: Vec<FiredAlert>,
    /// Doors skipped because their sensor could not be read.
    pub skipped: Vec<String>,
    /// Heartbeat line, on ticks that emit one.
    pub heartbeat: Option<String>,
}

pub struct PollLoop {
    monitors: Vec<DoorMonitor>,
    sensor: Box<dyn SensorReader>,
    pool: Arc<DispatchPool>,
    health: HealthCollector,
    schedule: HeartbeatSchedule,
    countdown: u32,
    status: watch::Sender<Vec<DoorSnapshot>>,
}

impl PollLoop {
    /// Take the initial reading of every door. Nothing fires for the
    /// initial states; a door that cannot be read is a startup error.
    pub fn new(
        doors: Vec<DoorConfig>,
        sensor: Box<dyn SensorReader>,
        pool: Arc<DispatchPool>,
        health: HealthCollector,
        schedule: HeartbeatSchedule,
        status: watch::Sender<Vec<DoorSnapshot>>,
        now: Timestamp,
    ) -> Result<Self, SensorError> {
        let mut monitors = Vec::with_capacity(doors.len());
        for door in doors {
            let state = sensor.read(&door)?;
            tracing::info!(door = %door.name, pin = door.pin, state = %state, "Initial state");
            monitors.push(DoorMonitor::new(door, state, now));
        }

        let poll = Self {
            monitors,
            sensor,
            pool,
            health,
            schedule,
            countdown: schedule.initial_ticks.max(1),
            status,
        };
        poll.publish();
        Ok(poll)
    }

    pub fn snapshots(&self) -> Vec<DoorSnapshot> {
        self.monitors.iter().map(DoorMonitor::snapshot).collect()
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshots());
    }

    /// Run one tick at `now`.
    pub async fn tick(&mut self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();

        for monitor in &mut self.monitors {
            let reading = match self.sensor.read(monitor.config()) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(door = %monitor.name(), error = %e, "Sensor read failed, skipping door this tick");
                    report.skipped.push(monitor.name().to_string());
                    continue;
                }
            };

            let (outcome, fired) = monitor.observe(reading, now);
            if outcome.changed {
                tracing::info!(
                    door = %monitor.name(),
                    state = %reading,
                    prior_secs = outcome.duration.num_seconds(),
                    "State of {} changed to {} after {} sec",
                    monitor.name(),
                    reading,
                    outcome.duration.num_seconds(),
                );
            }

            for alert in fired {
                submit(&self.pool, &alert);
                report.fired.push(alert);
            }
        }

        self.publish();

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            self.countdown = self.schedule.interval_ticks.max(1);
            let health = self.health.collect().await;
            let line = heartbeat_line(&health.to_string(), &self.snapshots(), now);
            tracing::info!("{line}");
            report.heartbeat = Some(line);
        }

        report
    }

    /// Tick every `period` until `cancel` fires. A late tick delays the
    /// schedule instead of bursting to catch up.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poll loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
    }
}

/// Why the daemon is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A termination signal arrived; the poll loop was cancelled.
    Signal,
    /// The poll task ended on its own (a panic, usually). Nothing can fire
    /// any more, so the process must not linger.
    PollLoopEnded,
}

/// Wait for `shutdown` or for the poll task to end, whichever comes first.
///
/// On a signal the loop is cancelled through `cancel` and awaited before
/// returning, so no tick is running once this resolves.
pub async fn wait_for_stop(
    poll: &mut JoinHandle<()>,
    cancel: &CancellationToken,
    shutdown: impl Future<Output = ()>,
) -> StopReason {
    let signalled = tokio::select! {
        () = shutdown => true,
        result = &mut *poll => {
            match result {
                Ok(()) => tracing::error!("Poll loop exited unexpectedly"),
                Err(e) => tracing::error!(error = %e, "Poll loop task failed"),
            }
            false
        }
    };

    if !signalled {
        return StopReason::PollLoopEnded;
    }

    cancel.cancel();
    if let Err(e) = poll.await {
        tracing::error!(error = %e, "Poll loop task failed while stopping");
    }
    StopReason::Signal
}

/// One dispatch per recipient of `alert`.
fn submit(pool: &DispatchPool, alert: &FiredAlert) {
    let context = AlertContext::from(alert);
    tracing::info!(
        door = %alert.door,
        kind = ?alert.kind,
        rule = alert.rule_index,
        recipients = alert.recipients.len(),
        body = %alert.body,
        "Alert fired"
    );
    for recipient in &alert.recipients {
        pool.submit(recipient.clone(), context.clone());
    }
}
