/// HTTP plumbing shared by the registry, gateway and canned backend servers
use crate::error::CharlaResult;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// JSON failure body: `{"ok": false, "error": ...}`
pub fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

/// Add `GET /shutdown`, which asks the server to stop gracefully
pub fn with_shutdown_route(router: Router, shutdown: Arc<Notify>) -> Router {
    router.route(
        "/shutdown",
        get(move || async move {
            tracing::info!("Shutdown requested over HTTP");
            shutdown.notify_one();
            "Server shutting down..."
        }),
    )
}

/// Serve `router` until ctrl-c or until `shutdown` is notified
pub async fn serve(listener: TcpListener, router: Router, shutdown: Arc<Notify>) -> CharlaResult<()> {
    let signal = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for ctrl-c: {}", e);
                }
                tracing::info!("Received ctrl-c, shutting down");
            }
            _ = shutdown.notified() => {}
        }
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;
    Ok(())
}
