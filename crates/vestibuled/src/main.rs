use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use vestibule_core::{MemberRegistry, RecognitionSession, RecordedExtractor};

mod config;
mod dbus_interface;
mod engine;
mod events;
mod feed;
mod monitor;
mod store;

use config::{BusKind, Config};
use events::EventLog;
use feed::FrameFeed;
use monitor::{Monitor, MonitorStats};
use store::SqliteStore;

const BUS_NAME: &str = "org.freedesktop.Vestibule1";
const OBJECT_PATH: &str = "/org/freedesktop/Vestibule1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vestibuled starting");

    let config = Config::load().context("invalid configuration")?;
    tracing::info!(
        model = %config.embedding_model,
        dim = ?config.expected_dim(),
        threshold = config.threshold,
        every_n = config.process_every_n_frames,
        db = %config.db_path.display(),
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open member database {}", config.db_path.display()))?;
    let registry = Arc::new(MemberRegistry::load(store, config.registry_options())?);

    let events = Arc::new(EventLog::default());
    events.note(&format!("Loaded {} members.", registry.len()));

    let engine = engine::spawn_engine(RecordedExtractor)?;
    let session = RecognitionSession::new(registry.clone(), config.match_policy(), events.clone())?;
    let stats = Arc::new(MonitorStats::default());
    let monitor = Monitor::new(
        session,
        engine.clone(),
        config.process_every_n_frames,
        stats.clone(),
        events.clone(),
    );

    let (control_tx, control_rx) = watch::channel(config.autostart);
    let feed = FrameFeed::open(&config.feed_path).await?;
    let monitor_task = tokio::spawn(monitor.run(
        feed,
        control_rx,
        Duration::from_millis(config.tick_interval_ms),
    ));

    let service = dbus_interface::VestibuleService {
        registry,
        engine,
        events,
        stats,
        control: control_tx,
        threshold: config.threshold,
        embedding_model: config.embedding_model.clone(),
    };

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "vestibuled ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("vestibuled shutting down");

    // Dropping the connection drops the service and its control sender,
    // which ends the monitor loop.
    drop(connection);
    let _ = tokio::time::timeout(Duration::from_secs(2), monitor_task).await;

    Ok(())
}
