use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

pub mod config;
pub mod domain;
pub mod error;
pub mod file_reply;
pub mod gcs;
mod handlers;
pub mod sqlite;

use crate::config::ServerConfig;
use crate::domain::Storage;
use crate::error::ServerError;

/// Backend shared by every request handler.
pub type SharedStorage = Arc<dyn Storage>;

/// Whole-file uploads are capped at 200MB by clients; leave room for multipart framing.
const BODY_LIMIT: usize = 256 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::upload_chunk,
        handlers::upload_file,
        handlers::bulk_upload,
        handlers::delete_object,
        handlers::get_object,
        handlers::list_folders,
        handlers::list_files,
        handlers::download_link,
        handlers::storage_config,
    ),
    components(schemas(
        kernel::SessionRequest,
        kernel::SessionResponse,
        kernel::SessionHandle,
        kernel::ChunkResponse,
        kernel::ObjectInfo,
        kernel::UploadResponse,
        kernel::BulkStatus,
        kernel::BulkUploadResult,
        kernel::BulkUploadResponse,
        kernel::ErrorResponse,
        kernel::DeleteResponse,
        kernel::DownloadLink,
        kernel::StorageConfig,
    )),
    tags(
        (name = "uploads", description = "Whole-file and resumable uploads"),
        (name = "objects", description = "Objects stored in the bucket"),
    )
)]
pub struct ApiDoc;

pub async fn run() -> Result<(), ServerError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "filedeck=debug,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let storage = config.open_storage()?;
    let info = storage.describe();
    match &info.bucket {
        Some(bucket) => tracing::info!("{} backend, bucket {bucket}", info.kind),
        None => tracing::warn!(
            "{} backend without bucket, set FILEDECK_BUCKET to enable uploads",
            info.kind
        ),
    }

    let socket = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(socket).await?;
    tracing::debug!("listening on {socket}");

    serve(listener, storage, shutdown_signal()).await
}

/// Serves the API on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, storage: SharedStorage, shutdown: F) -> Result<(), ServerError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_routes(storage);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn create_routes(storage: SharedStorage) -> Router {
    Router::new()
        .route(
            "/upload-session",
            post(handlers::create_session).put(handlers::upload_chunk),
        )
        .route("/upload", post(handlers::upload_file))
        .route("/bulk-upload", post(handlers::bulk_upload))
        .route(
            "/objects/:id",
            get(handlers::get_object).delete(handlers::delete_object),
        )
        .route("/folders/list", get(handlers::list_folders))
        .route("/files", get(handlers::list_files))
        .route("/download", get(handlers::download_link))
        .route("/storage/config", get(handlers::storage_config))
        .route("/api-docs/openapi.json", get(handlers::openapi))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
                .into_inner(),
        )
        .with_state(storage)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
