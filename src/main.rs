//! Security Monitor - door/motion monitor with live camera view
//!
//! Main entry point for the monitor service.

use security_monitor::{
    config_store::{ConfigStore, MonitorSettings},
    hardware::HardwareParts,
    monitor_loop::Monitor,
    state::{spawn_health_sampler, AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "security_monitor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Security Monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;
    let settings = MonitorSettings::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        backend = ?config.hardware.backend,
        image_dir = %config.image_dir.display(),
        static_dir = %config.static_dir.display(),
        auth_enabled = config.auth.is_some(),
        hot_reload_intervals = config.hot_reload_intervals,
        "Configuration loaded"
    );

    let config_store = Arc::new(ConfigStore::new(settings.clone()));
    tracing::info!("ConfigStore initialized");

    // Bring up peripherals; any failure here is fatal
    let parts = HardwareParts::from_config(&config.hardware, &settings.camera_settings());
    let simulator = parts.simulator.clone();
    let monitor = match Monitor::initialize(parts, config_store, config.monitor_options()).await {
        Ok(monitor) => monitor,
        Err(e) => {
            tracing::error!(error = %e, "Hardware initialization failed");
            return Err(e.into());
        }
    };
    let handle = monitor.handle();
    let monitor_task = tokio::spawn(monitor.run());
    tracing::info!("Monitor started");

    let state = AppState::new(config, handle.clone(), simulator);
    let app = web_api::create_app(state.clone());
    tracing::info!(static_dir = %state.config.static_dir.display(), "Static file serving enabled");

    // Host load feeds the degraded flag on /healthz
    let health_task = spawn_health_sampler(&state, Duration::from_secs(30));

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown = handle.shutdown().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    }
                    tracing::info!("Interrupt received");
                }
                _ = shutdown.wait() => {}
            }
            shutdown.trigger();
        })
        .await?;

    // Server is gone; make sure the loop stops and hardware is released
    handle.shutdown().trigger();
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "Monitor task failed");
    }
    health_task.abort();
    tracing::info!(phase = handle.phase().as_str(), "Security Monitor stopped");

    Ok(())
}
