/// Calls to answer backends
use crate::core::{BackendDescriptor, BackendRequest, Reply};
use crate::error::{CharlaError, CharlaResult};
use async_trait::async_trait;
use std::time::Instant;

/// How the gateway reaches a backend
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Send `request` to `backend` and decode its reply
    async fn call(&self, backend: &BackendDescriptor, request: &BackendRequest)
        -> CharlaResult<Reply>;
}

/// JSON over HTTP, one POST per call, bounded by the backend's timeout
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> CharlaResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn call(
        &self,
        backend: &BackendDescriptor,
        request: &BackendRequest,
    ) -> CharlaResult<Reply> {
        let started = Instant::now();
        let response = self
            .client
            .post(&backend.url)
            .timeout(backend.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CharlaError::timeout(format!("call to {}", backend.url))
                } else {
                    CharlaError::from(e)
                }
            })?;

        let status = response.status();
        let reply: Reply = response.json().await.map_err(|e| {
            CharlaError::backend(format!(
                "{} answered {} with an undecodable body: {}",
                backend.url, status, e
            ))
        })?;

        tracing::debug!(
            "Backend {} ({}) answered ok={} in {:?}",
            backend.name,
            backend.url,
            reply.ok,
            started.elapsed()
        );
        Ok(reply)
    }
}
