use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use warmup_engine::activity::ActivityLogger;
use warmup_engine::api::{AppState, control_routes};
use warmup_engine::config::WarmupConfig;
use warmup_engine::content::TemplateGenerator;
use warmup_engine::engine::{Collaborators, ReplyCycle, WarmupCycle};
use warmup_engine::events::{EventHub, EventSink};
use warmup_engine::scheduler::{CycleScheduler, ResetJob};
use warmup_engine::store::LibSqlBackend;
use warmup_engine::transport::MailboxTransportFactory;

#[tokio::main(worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = WarmupConfig::from_env().context("Invalid configuration")?;

    // ── Logging ─────────────────────────────────────────────────────────
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "warmup.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    eprintln!("📬 Warm-up engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Control API: http://0.0.0.0:{}/api/status", config.http_port);
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws/events", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Events ───────────────────────────────────────────────────────────
    let (events, event_rx) = EventSink::channel(config.event_buffer);
    let hub = EventHub::new();
    let _drain = hub.spawn_drain(event_rx);

    // ── Cycles ───────────────────────────────────────────────────────────
    let activity = ActivityLogger::new(store.clone());
    let deps = Collaborators {
        accounts: store.clone(),
        recipients: store.clone(),
        activity: activity.clone(),
        events: events.clone(),
        transports: Arc::new(MailboxTransportFactory::new(config.mail_timeout)),
        content: Arc::new(TemplateGenerator::new()),
    };
    let warmup =
        Arc::new(WarmupCycle::new(deps.clone()).with_bounce_threshold(config.bounce_threshold));
    let reply = Arc::new(ReplyCycle::new(deps).with_reply_rate(config.reply_rate));
    let reset = ResetJob::new(store.clone(), activity.clone(), events.clone());

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = Arc::new(CycleScheduler::standard(
        config.schedule()?,
        warmup,
        reply,
        reset,
        events.clone(),
    ));
    if config.auto_start {
        scheduler.start()?;
        eprintln!(
            "   Scheduler: running (warm-up every {}s, replies every {}s, reset `{}`)",
            config.warmup_interval.as_secs(),
            config.reply_interval.as_secs(),
            config.reset_cron,
        );
    } else {
        eprintln!("   Scheduler: stopped (POST /api/scheduler/start to begin)");
    }

    // ── Control API ──────────────────────────────────────────────────────
    let app = control_routes(AppState {
        accounts: store.clone(),
        recipients: store.clone(),
        log: store.clone(),
        activity,
        events,
        hub,
        scheduler: Arc::clone(&scheduler),
        default_hours: config.working_hours,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Control API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Shutting down");
    scheduler.shutdown();
    Ok(())
}
