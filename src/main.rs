use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use unijoy::config::UnijoyConfig;
use unijoy::control::{ControlProtocol, ControlServer};
use unijoy::host::EvdevHost;
use unijoy::output::{self, VirtualJoystick, WorkerHandle};
use unijoy::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = UnijoyConfig::default_path()?;
    let config = UnijoyConfig::load(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load config {}: {}", config_path.display(), e))?;
    setup_logging(&config.logging.level);
    info!("Using config {}", config_path.display());
    debug!("Effective config: {:?}", config);

    let shutdown = CancellationToken::new();

    let (producer, consumer) = output::bounded(config.queue.capacity);
    let engine = Arc::new(Engine::new(config.engine_settings(), producer));

    let mut worker = WorkerHandle::spawn(
        engine.clone(),
        consumer,
        Box::new(VirtualJoystick::new()),
        shutdown.child_token(),
    );

    let server = ControlServer::bind(
        &config.control.socket_path,
        ControlProtocol::new(engine.clone()),
        config.control.request_timeout(),
    )
    .await
    .map_err(|e| eyre!("Failed to start control socket: {}", e))?;
    let server_handle = server.spawn(shutdown.child_token());

    let host = EvdevHost::new(
        engine.clone(),
        config.host.scan_interval(),
        shutdown.child_token(),
    );
    let host_handle = host.spawn();

    info!("unijoy running, waiting for Ctrl-C");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;

    info!("Shutting down");
    shutdown.cancel();

    for (name, handle) in [("control socket", server_handle), ("input host", host_handle)] {
        if let Err(e) = handle.await {
            warn!("{} task failed: {}", name, e);
        }
    }

    match worker.shutdown().await {
        Ok(report) => info!(
            "Output worker finished: {} emitted, {} refreshes, {} discarded",
            report.emitted, report.refreshes, report.discarded
        ),
        Err(e) => error!("{}", e),
    }
    engine.teardown();

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
