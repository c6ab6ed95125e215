/// HTTP surface of the gateway and of the canned backend
use crate::core::{ApiRequest, BackendDescriptor, BackendRequest, Outcome, QuotaConfig, Reply};
use crate::gateway::fallback::canned_answer;
use crate::gateway::Gateway;
use crate::server::failure;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// `POST /api`, `POST /update_services`, `POST /update_quoatas`
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api", post(api))
        .route("/update_services", post(update_services))
        .route("/update_quoatas", post(update_quotas))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Rejected malformed request body: {}", e);
        failure(StatusCode::BAD_REQUEST, format!("invalid request: {e}"))
    })
}

async fn api(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let request: ApiRequest = match parse(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match gateway.handle(&request.uid, &request.query).await {
        Outcome::Rejected => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Outcome::Replied(reply) => Json(reply).into_response(),
    }
}

async fn update_services(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let services: Vec<BackendDescriptor> = match parse(&body) {
        Ok(services) => services,
        Err(response) => return response,
    };

    gateway.directory().update(services).await;
    Json(json!({ "updated": true })).into_response()
}

async fn update_quotas(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let quotas: QuotaConfig = match parse(&body) {
        Ok(quotas) => quotas,
        Err(response) => return response,
    };

    gateway.quotas().update_config(quotas).await;
    Json(json!({ "updated": true })).into_response()
}

/// A backend that always answers from the canned table
pub fn canned_router(name: impl Into<String>) -> Router {
    Router::new()
        .route("/api", post(canned))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(name.into()))
}

async fn canned(State(name): State<Arc<String>>, body: Bytes) -> Response {
    let request: BackendRequest = match parse(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let reply = Reply {
        from: Some(name.as_str().to_string()),
        uid: Some(request.uid),
        ..Reply::success(canned_answer(&request.query))
    };
    Json(reply).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AdmissionController, ConversationHistory, ServiceDirectory};
    use crate::gateway::transport::HttpTransport;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn gateway(quotas: QuotaConfig) -> Arc<Gateway> {
        Arc::new(Gateway::new(
            Arc::new(ServiceDirectory::new()),
            Arc::new(AdmissionController::new(quotas)),
            Arc::new(ConversationHistory::default()),
            Arc::new(HttpTransport::new().unwrap()),
        ))
    }

    #[tokio::test]
    async fn test_api_without_backends_returns_fallback() {
        let app = router(gateway(QuotaConfig::default()));

        let response = app
            .oneshot(post_json("/api", json!({"uid": "7", "query": "Сколько времени?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["from"], "fallback");
        assert_eq!(body["reply"], "Об этом не рассказывают!");
    }

    #[tokio::test]
    async fn test_api_rejection_is_429_with_empty_body() {
        let gateway = gateway(QuotaConfig {
            max_in_flight: 0,
            max_in_flight_for_uid: 0,
        });
        assert!(gateway.quotas().try_acquire("someone").await);
        let app = router(gateway);

        let response = app
            .oneshot(post_json("/api", json!({"uid": "7", "query": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(read_body(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_api_malformed_body() {
        let app = router(gateway(QuotaConfig::default()));

        let response = app
            .oneshot(post_json("/api", json!({"query": "no uid"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["ok"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_update_services_replaces_directory() {
        let gateway = gateway(QuotaConfig::default());
        let app = router(Arc::clone(&gateway));

        let response = app
            .oneshot(post_json(
                "/update_services",
                json!([
                    {"name": "gen", "url": "http://10.0.0.1/api", "timeout": 1, "history_len": 2, "priority": 2},
                    {"name": "wiki", "url": "http://10.0.0.2/api", "timeout": 1, "history_len": 0, "priority": 5}
                ]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body, json!({"updated": true}));

        assert_eq!(gateway.directory().name_count().await, 2);
    }

    #[tokio::test]
    async fn test_update_quotas() {
        let gateway = gateway(QuotaConfig::default());
        let app = router(Arc::clone(&gateway));

        let response = app
            .oneshot(post_json(
                "/update_quoatas",
                json!({"max_in_flight": 7, "max_in_flight_for_uid": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(
            gateway.quotas().config().await,
            QuotaConfig {
                max_in_flight: 7,
                max_in_flight_for_uid: 3
            }
        );
    }

    #[tokio::test]
    async fn test_canned_backend_speaks_backend_contract() {
        let app = canned_router("canned");

        let response = app
            .oneshot(post_json(
                "/api",
                json!({"uid": "7", "query": "Почему?", "history": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(
            body,
            json!({"ok": true, "reply": "Вот так вот", "from": "canned", "uid": "7"})
        );
    }
}
