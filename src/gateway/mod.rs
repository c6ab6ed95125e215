/// Aggregating gateway
///
/// A query is admitted against the quotas, fanned out to one instance of
/// every known backend, and answered with the best reply by priority. The
/// canned fallback is computed up front so that every exit path has an answer
/// ready, and the admission slot is released exactly once whatever happens
/// between dispatch and merge.
pub mod fallback;
pub mod http;
pub mod merge;
pub mod transport;

use crate::core::{
    AdmissionController, BackendRequest, ConversationHistory, Outcome, Reply, ServiceDirectory,
};
use crate::utils::generate_id;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use transport::BackendTransport;

pub use fallback::fallback_reply;
pub use merge::select_reply;
pub use transport::HttpTransport;

/// Fan-out aggregator wired to its collaborators at construction
pub struct Gateway {
    directory: Arc<ServiceDirectory>,
    quotas: Arc<AdmissionController>,
    history: Arc<ConversationHistory>,
    transport: Arc<dyn BackendTransport>,
}

impl Gateway {
    pub fn new(
        directory: Arc<ServiceDirectory>,
        quotas: Arc<AdmissionController>,
        history: Arc<ConversationHistory>,
        transport: Arc<dyn BackendTransport>,
    ) -> Self {
        Self {
            directory,
            quotas,
            history,
            transport,
        }
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.directory
    }

    pub fn quotas(&self) -> &Arc<AdmissionController> {
        &self.quotas
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    /// Answer one front-end query
    pub async fn handle(&self, uid: &str, query: &str) -> Outcome {
        let fallback = fallback_reply(uid, query);

        if !self.quotas.try_acquire(uid).await {
            tracing::info!("Quota exceeded for uid {}, rejecting query", uid);
            return Outcome::Rejected;
        }

        let request_id = generate_id("req");
        tracing::debug!("[{}] Admitted query from uid {}: {:?}", request_id, uid, query);

        let merged = AssertUnwindSafe(self.fan_out(&request_id, uid, query))
            .catch_unwind()
            .await;

        let reply = match merged {
            Ok(Some(reply)) if reply.ok => reply,
            Ok(_) => {
                tracing::debug!("[{}] No usable backend reply, using fallback", request_id);
                fallback
            }
            Err(_) => {
                tracing::error!(
                    "[{}] Aggregation panicked for uid {} query {:?}",
                    request_id,
                    uid,
                    query
                );
                fallback
            }
        };

        self.finish(&request_id, uid, query, &reply).await;
        Outcome::Replied(reply)
    }

    /// Release the admission slot and record the exchange
    async fn finish(&self, request_id: &str, uid: &str, query: &str, reply: &Reply) {
        if let Err(e) = self.quotas.release(uid).await {
            tracing::error!("[{}] {} ({})", request_id, e, e.severity());
        }

        self.history.append(uid, query).await;
        self.history
            .append(uid, reply.reply.clone().unwrap_or_default())
            .await;
    }

    /// Dispatch to every selected backend concurrently and merge the results.
    ///
    /// Each backend is waited on for its own timeout, all at once; a backend
    /// that misses its deadline is aborted and contributes nothing.
    async fn fan_out(&self, request_id: &str, uid: &str, query: &str) -> Option<Reply> {
        let backends = self.directory.select().await;
        if backends.is_empty() {
            tracing::warn!("[{}] No backends known, nothing to dispatch", request_id);
            return None;
        }

        let mut dispatched = Vec::with_capacity(backends.len());
        for backend in backends {
            let request = BackendRequest {
                uid: uid.to_string(),
                query: query.to_string(),
                history: self.history.read(uid, backend.history_len).await,
            };
            let transport = Arc::clone(&self.transport);
            let target = backend.clone();
            let task_id = request_id.to_string();

            let handle = tokio::spawn(async move {
                match transport.call(&target, &request).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!("[{}] Backend {} failed: {}", task_id, target.url, e);
                        Reply::failure(e.to_string())
                    }
                }
            });
            dispatched.push((backend, handle));
        }

        let waits = dispatched.into_iter().map(|(backend, mut handle)| async move {
            match tokio::time::timeout(backend.timeout, &mut handle).await {
                Ok(Ok(reply)) => Some(reply.attributed_to(&backend)),
                Ok(Err(e)) => {
                    tracing::error!(
                        "[{}] Dispatch task for {} did not complete for uid {} query {:?}: {}",
                        request_id,
                        backend.url,
                        uid,
                        query,
                        e
                    );
                    Some(Reply::failure(format!("dispatch failed: {e}")).attributed_to(&backend))
                }
                Err(_) => {
                    handle.abort();
                    tracing::debug!(
                        "[{}] Backend {} missed its {:?} deadline",
                        request_id,
                        backend.url,
                        backend.timeout
                    );
                    None
                }
            }
        });

        let results = futures::future::join_all(waits).await;

        tracing::debug!("[{}] Collected results: {:?}", request_id, results);
        select_reply(results)
    }
}
