//! screenspan server entry point.
//!
//! Wires together the coordinator, the TCP acceptor, and the signal
//! handler, then runs the coordinator's event loop on the Tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ ServerConfig::load()   -- config file, topology, options
//!  └─ Server::new()          -- coordinator state, primary screen
//!  └─ start tasks
//!       ├─ net::serve        -- accept loop, one reader/writer per client
//!       ├─ heartbeat ticker  -- inside Server::run
//!       └─ Ctrl-C handler    -- posts Shutdown
//!  └─ server.run(events)     -- the single task that owns all state
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use span_core::domain::topology::ScreenShape;

use span_server::config::ServerConfig;
use span_server::net;
use span_server::proxy::PrimaryProxy;
use span_server::screen::HeadlessScreen;
use span_server::server::{Server, ServerEvent, ServerOptions};
use span_server::status::{StatusEvent, StatusReporter, TracingReporter};

fn config_path() -> PathBuf {
    // `span-server [CONFIG]`, defaulting to ./screenspan.toml
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("screenspan.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = config_path();
    let config = ServerConfig::load(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    let topology = config.build_topology()?;
    let minimum = config.minimum_protocol()?;
    let options = ServerOptions::from_config(&config.options);

    info!(
        screen = %config.server.name,
        screens = topology.screens().count(),
        %minimum,
        "screenspan server starting"
    );

    // The shipped binary has no capture backend; it coordinates a
    // headless primary screen. Platform capture feeds events into the
    // same channel when present.
    let primary = PrimaryProxy::new(
        config.server.name.clone(),
        Box::new(HeadlessScreen::new(ScreenShape::new(0, 0, 1920, 1080), 1)),
    );

    let reporter: Arc<dyn StatusReporter> = Arc::new(TracingReporter);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let server = Server::new(
        topology,
        Box::new(primary),
        options,
        Arc::clone(&reporter),
        events_tx.clone(),
    );

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = net::bind_with_backoff(&addr).await?;
    reporter
        .report(StatusEvent::Listening { addr: addr.clone() })
        .await;
    tokio::spawn(net::serve(listener, events_tx.clone(), minimum));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let shutdown_tx = events_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(ServerEvent::Shutdown);
        }
    });

    server.run(events_rx).await;

    info!("screenspan server stopped");
    Ok(())
}
