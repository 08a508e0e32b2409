//! Web interface for the annotation workflow.
//!
//! Server-rendered pages for uploading, annotating and managing images,
//! plus a small JSON API for search and progress.

mod handlers;
mod routes;
mod templates;

pub use routes::create_router;
pub use templates::Notice;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::repository::open_database;
use crate::services::AnnotationService;
use crate::storage::ObjectStoreGateway;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub service: AnnotationService,
}

impl AppState {
    /// Connect storage and database, provisioning the container if needed.
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let gateway = ObjectStoreGateway::from_settings(&settings.storage)?;
        gateway.ensure_container().await?;

        let images = open_database(&settings.database_url).await?;

        Ok(Self::from_service(AnnotationService::new(
            images,
            Arc::new(gateway),
        )))
    }

    pub fn from_service(service: AnnotationService) -> Self {
        Self { service }
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings).await?;
    let app = create_router(state, settings.max_upload_bytes);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
