//! End-to-end tick scenarios: scripted sensor readings in, channel sends out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use doorwatch_agent::{HealthCollector, HeartbeatSchedule, PollLoop, SensorError, SensorReader};
use doorwatch_core::status::DoorSnapshot;
use doorwatch_core::{AlertKind, AlertRule, DoorConfig, DoorState, RecipientRef, Scheme, Timestamp};
use doorwatch_events::{AlertContext, DeliveryError, DispatchPool, NotificationChannel, RecipientDispatcher};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Sensor whose readings the test sets by door name. A door without a
/// reading fails to read.
#[derive(Clone, Default)]
struct ScriptedSensor {
    readings: Arc<Mutex<HashMap<String, DoorState>>>,
}

impl ScriptedSensor {
    fn set(&self, door: &str, state: DoorState) {
        self.readings.lock().unwrap().insert(door.to_string(), state);
    }

    fn unplug(&self, door: &str) {
        self.readings.lock().unwrap().remove(door);
    }
}

impl SensorReader for ScriptedSensor {
    fn read(&self, door: &DoorConfig) -> Result<DoorState, SensorError> {
        self.readings
            .lock()
            .unwrap()
            .get(&door.name)
            .copied()
            .ok_or(SensorError::BadValue {
                pin: door.pin,
                value: String::new(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sent {
    scheme: Scheme,
    address: String,
    body: String,
    duration_secs: i64,
}

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingChannel {
    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent {
            scheme: recipient.scheme,
            address: recipient.address.clone(),
            body: alert.body.clone(),
            duration_secs: alert.duration_secs,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn t(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn rule(threshold_secs: u64, recipients: &[&str]) -> AlertRule {
    AlertRule {
        state: DoorState::Open,
        threshold_secs,
        recipients: recipients.iter().map(|r| r.to_string()).collect(),
    }
}

fn door(name: &str, alerts: Vec<AlertRule>) -> DoorConfig {
    DoorConfig {
        name: name.into(),
        pin: 15,
        alerts,
    }
}

struct Harness {
    poll: PollLoop,
    pool: Arc<DispatchPool>,
    sensor: ScriptedSensor,
    channel: Arc<RecordingChannel>,
    status: watch::Receiver<Vec<DoorSnapshot>>,
}

impl Harness {
    fn new(doors: Vec<DoorConfig>, initial: DoorState) -> Self {
        let sensor = ScriptedSensor::default();
        for d in &doors {
            sensor.set(&d.name, initial);
        }

        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = RecipientDispatcher::new().with_channel(&Scheme::ALL, channel.clone());
        let pool = Arc::new(DispatchPool::new(Arc::new(dispatcher), 4, Duration::from_secs(5)));

        let missing = std::env::temp_dir().join("doorwatch-poll-loop-tests-missing");
        let health = HealthCollector::new(missing.join("temp"), missing.join("uptime"), None);
        let (tx, status) = watch::channel(Vec::new());

        let poll = PollLoop::new(
            doors,
            Box::new(sensor.clone()),
            Arc::clone(&pool),
            health,
            HeartbeatSchedule::default(),
            tx,
            t(-100),
        )
        .unwrap();

        Self {
            poll,
            pool,
            sensor,
            channel,
            status,
        }
    }

    /// Tick at `secs` and wait for the resulting sends to land.
    async fn tick(&mut self, secs: i64) -> Vec<Sent> {
        self.poll.tick(t(secs)).await;
        self.pool.wait_idle().await;
        let mut sent = self.channel.take();
        sent.sort_by(|a, b| a.address.cmp(&b.address));
        sent
    }

    fn cursor(&self, door: &str) -> usize {
        self.status
            .borrow()
            .iter()
            .find(|s| s.name == door)
            .map(|s| s.cursor)
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_escalate_close_reset() {
    let mut h = Harness::new(
        vec![door("Garage", vec![rule(10, &["sms:+15551234567", "email:a@example.com"])])],
        DoorState::Closed,
    );

    // t=0: opens. Cursor was already 0, so no reset.
    h.sensor.set("Garage", DoorState::Open);
    assert!(h.tick(0).await.is_empty());
    assert_eq!(h.cursor("Garage"), 0);

    // t=5: still under threshold.
    assert!(h.tick(5).await.is_empty());

    // t=11: rule A fires to both recipients.
    let sent = h.tick(11).await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].address, "+15551234567");
    assert_eq!(sent[0].scheme, Scheme::Sms);
    assert_eq!(sent[0].body, "Garage has been open for 11 seconds!");
    assert_eq!(sent[1].scheme, Scheme::Email);
    assert_eq!(h.cursor("Garage"), 1);

    // t=15: nothing more to fire.
    assert!(h.tick(15).await.is_empty());

    // t=20: closes, reset goes to rule A's recipients.
    h.sensor.set("Garage", DoorState::Closed);
    let sent = h.tick(20).await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.body == "Garage is now closed"));
    assert!(sent.iter().all(|s| s.duration_secs == 0));
    assert_eq!(h.cursor("Garage"), 0);
}

#[tokio::test]
async fn large_gap_fires_only_next_rule() {
    let mut h = Harness::new(
        vec![door("Garage", vec![rule(10, &["sms:+1"]), rule(20, &["sms:+2"])])],
        DoorState::Closed,
    );

    h.sensor.set("Garage", DoorState::Open);
    assert!(h.tick(0).await.is_empty());

    let sent = h.tick(25).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "+1");
    assert_eq!(h.cursor("Garage"), 1);

    // Rule B waits for the following tick.
    let sent = h.tick(26).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "+2");
    assert_eq!(h.cursor("Garage"), 2);
}

#[tokio::test]
async fn reset_uses_last_fired_rule_recipients() {
    let mut h = Harness::new(
        vec![door(
            "Garage",
            vec![rule(10, &["sms:+1"]), rule(20, &["sms:+2"]), rule(30, &["sms:+3"])],
        )],
        DoorState::Closed,
    );

    h.sensor.set("Garage", DoorState::Open);
    h.tick(0).await;
    h.tick(11).await;
    h.tick(21).await;
    assert_eq!(h.cursor("Garage"), 2);

    h.sensor.set("Garage", DoorState::Closed);
    let sent = h.tick(25).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "+2");
    assert_eq!(sent[0].body, "Garage is now closed");
}

#[tokio::test]
async fn no_alert_for_initial_open_state() {
    // The door is already open when the agent starts; thresholds count
    // from startup (t=-100), not from some earlier history.
    let mut h = Harness::new(vec![door("Garage", vec![rule(200, &["sms:+1"])])], DoorState::Open);
    assert!(h.tick(0).await.is_empty());
    assert_eq!(h.tick(101).await.len(), 1);
}

#[tokio::test]
async fn light_toggles_only_for_escalations() {
    let mut h = Harness::new(
        vec![door("Garage", vec![rule(10, &["hue_on:Porch", "sms:+1"])])],
        DoorState::Closed,
    );

    h.sensor.set("Garage", DoorState::Open);
    h.tick(0).await;
    let sent = h.tick(11).await;
    assert!(sent.iter().any(|s| s.scheme == Scheme::HueOn && s.address == "Porch"));

    h.sensor.set("Garage", DoorState::Closed);
    let sent = h.tick(12).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].scheme, Scheme::Sms);
}

#[tokio::test]
async fn unknown_recipient_does_not_block_others() {
    let mut h = Harness::new(
        vec![door("Garage", vec![rule(10, &["bogus:foo", "sms:", "tweet"])])],
        DoorState::Open,
    );
    let sent = h.tick(-89).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].scheme, Scheme::Tweet);
    assert_eq!(h.cursor("Garage"), 1);
}

#[tokio::test]
async fn unreadable_sensor_skips_door_without_transition() {
    let mut h = Harness::new(
        vec![
            door("Left", vec![rule(10, &["sms:+1"])]),
            door("Right", vec![rule(10, &["sms:+2"])]),
        ],
        DoorState::Open,
    );

    h.sensor.unplug("Left");
    let report = h.poll.tick(t(0)).await;
    assert_eq!(report.skipped, vec!["Left".to_string()]);
    assert_eq!(report.fired.len(), 1);
    assert_eq!(report.fired[0].door, "Right");
    assert_eq!(report.fired[0].kind, AlertKind::Escalation);

    // Once readable again, Left picks up where it was: still open, no reset.
    h.pool.wait_idle().await;
    h.channel.take();
    h.sensor.set("Left", DoorState::Open);
    let sent = h.tick(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "+1");
    assert_eq!(sent[0].body, "Left has been open for 101 seconds!");
}

#[tokio::test]
async fn doors_escalate_independently() {
    let mut h = Harness::new(
        vec![
            door("Left", vec![rule(10, &["sms:+1"])]),
            door("Right", vec![rule(10, &["sms:+2"])]),
        ],
        DoorState::Closed,
    );

    h.sensor.set("Left", DoorState::Open);
    h.tick(0).await;
    let sent = h.tick(11).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "+1");
    assert_eq!(h.cursor("Left"), 1);
    assert_eq!(h.cursor("Right"), 0);
}
