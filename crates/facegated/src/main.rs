use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dataset;
mod dbus_interface;
mod enrollment;
mod http;
mod recognition;
mod service;
mod store;
mod stream;
#[cfg(test)]
mod test_support;
mod training;

use config::{BusKind, Config};
use dbus_interface::{FacegateService, BUS_NAME, OBJECT_PATH};
use service::Facegate;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::load()?;
    tracing::info!(
        camera = config.camera_index,
        model_dir = %config.model_dir.display(),
        dataset_dir = %config.dataset_dir.display(),
        db = %config.db_path.display(),
        "configuration loaded"
    );

    // Model loading and the initial training run are blocking work.
    let app = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Facegate::start(&config)).await??
    };
    let app = Arc::new(app);

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FacegateService::new(Arc::clone(&app)))?
        .build()
        .await
        .context("failed to register on D-Bus")?;
    tracing::info!(bus = ?config.bus, name = BUS_NAME, "D-Bus interface registered");

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "preview streams listening");

    tracing::info!("facegated ready");

    axum::serve(listener, http::router(Arc::clone(&app)))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("facegated shutting down");
    tokio::task::spawn_blocking(move || app.shutdown()).await?;

    Ok(())
}
