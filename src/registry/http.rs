/// HTTP surface of the registry store
use crate::core::BackendDescriptor;
use crate::registry::RegistryStore;
use crate::server::failure;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// `POST /register` and `GET /get`
pub fn router(store: Arc<RegistryStore>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/get", get(list))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Store the descriptor and echo the request body back
async fn register(State(store): State<Arc<RegistryStore>>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Rejected register request with invalid JSON: {}", e);
            return failure(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}"));
        }
    };

    if !payload.get("url").is_some_and(Value::is_string) {
        tracing::warn!("Rejected register request without url: {}", payload);
        return failure(StatusCode::BAD_REQUEST, "descriptor must include a string url");
    }

    let descriptor: BackendDescriptor = match serde_json::from_value(payload.clone()) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!("Rejected register request {}: {}", payload, e);
            return failure(StatusCode::BAD_REQUEST, format!("invalid descriptor: {e}"));
        }
    };

    tracing::debug!("Register request: {}", payload);
    store.register_body(descriptor, payload.clone()).await;
    Json(payload).into_response()
}

async fn list(State(store): State<Arc<RegistryStore>>) -> Json<Vec<Value>> {
    let services = store.list_bodies().await;
    tracing::debug!("Listing {} visible services", services.len());
    Json(services)
}
