use anyhow::{Context, Result};
use casefile_core::{FaceBackend, OnnxFaceBackend, VisionBackends};
use casefile_media::AnnotatedImageWriter;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod pipeline;
mod records;
mod store;

use config::Config;
use dbus_interface::{CasefileService, BUS_NAME, OBJECT_PATH};
use pipeline::CapturePipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        photos_dir = %config.photos_dir.display(),
        "casefiled starting"
    );

    let store = store::RecordStore::open(&config.db_path)
        .with_context(|| format!("opening record store {}", config.db_path.display()))?;
    let records = records::spawn_records(store)?;

    std::fs::create_dir_all(&config.photos_dir)
        .with_context(|| format!("creating photos dir {}", config.photos_dir.display()))?;

    let pipeline = CapturePipeline::new(
        records,
        load_backends(&config),
        AnnotatedImageWriter::with_quality(config.jpeg_quality),
        config.photos_dir.clone(),
        config.backend_timeout(),
    );
    let events = pipeline.subscribe();
    let service = CasefileService::new(pipeline, config.db_path.clone());

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;

    let emitter = SignalEmitter::new(&connection, OBJECT_PATH)?;
    tokio::spawn(dbus_interface::forward_events(emitter, events));

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "casefiled ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("casefiled shutting down");

    Ok(())
}

/// Load the vision capabilities this host can run.
///
/// A missing model is not fatal: captures in that mode are reported as
/// skipped.
fn load_backends(config: &Config) -> VisionBackends {
    let mut backends = VisionBackends::default();

    if config.face_detection {
        let path = config.face_model_path();
        match OnnxFaceBackend::load(&path) {
            Ok(backend) => {
                tracing::info!(path = %path.display(), "SCRFD face backend loaded");
                backends.face = Some(Arc::new(backend) as Arc<dyn FaceBackend>);
            }
            Err(e) => {
                tracing::warn!(error = %e, "face backend unavailable; face captures will be skipped");
            }
        }
    } else {
        tracing::info!("face detection disabled via CASEFILE_FACE_DETECTION=0");
    }

    tracing::info!(available = ?backends.available(), "vision backends");
    let missing = backends.missing();
    if !missing.is_empty() {
        tracing::warn!(?missing, "no backend for these capabilities; captures in their modes will be skipped");
    }
    backends
}
