//! Route table for the web interface.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;
use crate::config::StorageBackendKind;
use crate::storage::STORAGE_ROUTE;

/// Build the application router.
///
/// Images kept on the local filesystem or in memory are served under
/// [`STORAGE_ROUTE`].
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let storage = state.service.storage();
    let local_root = storage.local_root().map(|p| p.to_path_buf());
    let in_memory = storage.backend_kind() == StorageBackendKind::Memory;

    let mut router = Router::new()
        .route("/", get(handlers::dashboard))
        .route("/upload", get(handlers::upload_form).post(handlers::upload))
        .route(
            "/extract/:id",
            get(handlers::extract_form).post(handlers::extract_submit),
        )
        .route("/batch", get(handlers::batch))
        .route("/admin", get(handlers::admin_tools))
        .route("/admin/images", get(handlers::all_images))
        .route("/admin/delete_image/:id", post(handlers::delete_image))
        .route("/api/search", get(handlers::api_search))
        .route("/api/stats", get(handlers::api_stats))
        .route("/healthz", get(handlers::healthz))
        .route("/static/style.css", get(handlers::stylesheet));

    if let Some(root) = local_root {
        router = router.nest_service(STORAGE_ROUTE, ServeDir::new(root));
    } else if in_memory {
        router = router.route(
            &format!("{}/:container/*key", STORAGE_ROUTE),
            get(handlers::stored_object),
        );
    }

    router
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
