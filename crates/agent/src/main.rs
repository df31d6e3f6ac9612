//! `doorwatch-agent` -- garage door monitoring daemon.
//!
//! Polls door sensors once per tick, escalates through each door's alert
//! rules while it stays in an alarming state, and answers `status` over
//! XMPP. Process settings are documented on
//! [`AgentConfig::from_env`](doorwatch_agent::AgentConfig::from_env); each
//! channel reads its own credentials.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use doorwatch_agent::{
    wait_for_stop, AgentConfig, HealthCollector, LogFormat, PollLoop, StatusQueryService, StopReason, SysfsGpio,
};
use doorwatch_core::Scheme;
use doorwatch_events::delivery::{
    EmailChannel, EmailConfig, GcmChannel, GcmConfig, HueChannel, HueConfig, IftttChannel, IftttConfig,
    PushbulletChannel, SlackChannel, SlackConfig, SmsChannel, SmsConfig, SparkChannel, SparkConfig, TwitterChannel,
    TwitterConfig,
};
use doorwatch_events::http::build_client;
use doorwatch_events::jabber::{self, JabberChannel, JabberConfig};
use doorwatch_events::{DispatchPool, RecipientDispatcher};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the jabber session gets to close its stream on shutdown.
const JABBER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::from_env());

    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let doors = doorwatch_agent::config::load_doors(&config.door_file).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to load door configuration");
        std::process::exit(1);
    });

    tracing::info!(
        doors = doors.len(),
        door_file = %config.door_file.display(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting doorwatch-agent",
    );

    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = watch::channel(Vec::new());

    // --- Instant-message session (channel + status command surface) ---
    let jabber_config = JabberConfig::from_env();
    let (jabber_handle, jabber_task) = match jabber_config {
        Some(jc) => {
            tracing::info!(jid = %jc.jid.bare(), authorized = jc.authorized_ids.len(), "Starting jabber session");
            let status = Arc::new(StatusQueryService::new(status_rx, jc.authorized_ids.clone()));
            let (handle, task) = jabber::spawn(jc, status, cancel.child_token());
            (Some(handle), Some(task))
        }
        None => {
            tracing::info!("Jabber not configured, status queries disabled");
            (None, None)
        }
    };

    // --- Channels ---
    let client = build_client();
    let dispatcher = RecipientDispatcher::new()
        .with_channel(&[Scheme::Email], Arc::new(EmailChannel::new(EmailConfig::from_env())))
        .with_channel(&[Scheme::Sms], Arc::new(SmsChannel::new(client.clone(), SmsConfig::from_env())))
        .with_channel(
            &[Scheme::TwitterDm, Scheme::Tweet],
            Arc::new(TwitterChannel::new(client.clone(), TwitterConfig::from_env())),
        )
        .with_channel(&[Scheme::Jabber], Arc::new(JabberChannel::new(jabber_handle)))
        .with_channel(&[Scheme::Pushbullet], Arc::new(PushbulletChannel::new(client.clone())))
        .with_channel(&[Scheme::Ifttt], Arc::new(IftttChannel::new(client.clone(), IftttConfig::from_env())))
        .with_channel(&[Scheme::Spark], Arc::new(SparkChannel::new(client.clone(), SparkConfig::from_env())))
        .with_channel(&[Scheme::Gcm], Arc::new(GcmChannel::new(client.clone(), GcmConfig::from_env())))
        .with_channel(&[Scheme::Slack], Arc::new(SlackChannel::new(client.clone(), SlackConfig::from_env())))
        .with_channel(
            &[Scheme::HueOn, Scheme::HueOff],
            Arc::new(HueChannel::new(client, HueConfig::from_env())),
        );

    tracing::info!(schemes = ?dispatcher.registered_schemes(), "Notification channels registered");

    let pool = Arc::new(DispatchPool::new(
        Arc::new(dispatcher),
        config.dispatch_concurrency,
        config.send_timeout,
    ));

    // --- Sensors and poll loop ---
    let gpio = SysfsGpio::new(&config.gpio_root);
    let pins: Vec<u32> = doors.iter().map(|d| d.pin).collect();
    if let Err(e) = gpio.prepare(&pins) {
        tracing::error!(error = %e, "Failed to prepare GPIO pins");
        std::process::exit(1);
    }

    let poll = PollLoop::new(
        doors,
        Box::new(gpio),
        Arc::clone(&pool),
        HealthCollector::default(),
        config.heartbeat,
        status_tx,
        Utc::now(),
    )
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "Initial sensor read failed");
        std::process::exit(1);
    });

    let poll_cancel = cancel.child_token();
    let mut poll_handle = tokio::spawn(poll.run(config.poll_interval, poll_cancel.clone()));

    let stop = wait_for_stop(&mut poll_handle, &poll_cancel, shutdown_signal()).await;

    // --- Shutdown: drain sends, close the session ---
    if pool.shutdown(config.shutdown_grace).await {
        tracing::info!("In-flight alerts finished");
    } else {
        tracing::warn!(
            pending = pool.in_flight(),
            grace_secs = config.shutdown_grace.as_secs(),
            "Abandoning alerts still in flight"
        );
    }

    cancel.cancel();
    if let Some(task) = jabber_task {
        let _ = tokio::time::timeout(JABBER_CLOSE_TIMEOUT, task).await;
        tracing::info!("Jabber session stopped");
    }

    if stop == StopReason::PollLoopEnded {
        tracing::error!("doorwatch-agent stopped after poll loop failure");
        std::process::exit(1);
    }
    tracing::info!("doorwatch-agent stopped");
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "doorwatch_agent=info,doorwatch_events=info,doorwatch_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
