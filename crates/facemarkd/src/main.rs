use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{FacemarkService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facemarkd starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        backend = %config.backend,
        model_dir = %config.model_dir.display(),
        max_detections = config.max_detections,
        max_image_dim = config.max_image_dim,
        max_sessions = config.max_sessions,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start detection engine")?;

    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FacemarkService::new(engine))?
        .build()
        .await
        .context("failed to register D-Bus service")?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "facemarkd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facemarkd shutting down");

    Ok(())
}
