/// Minimal service registry
///
/// Backends heartbeat their descriptor into the registry; a record stays
/// visible while its last heartbeat is younger than the configured lifetime.
/// Nothing is ever explicitly unregistered: stale records simply stop being
/// listed and are purged in the background.
pub mod client;
pub mod http;

use crate::core::BackendDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(60 * 60 * 10);

/// A registered backend and the time of its last heartbeat
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub descriptor: BackendDescriptor,
    /// Body exactly as posted to `/register`, extra fields included
    pub body: Option<Value>,
    pub last_heartbeat: SystemTime,
}

impl RegistrationRecord {
    /// Whether the record is still visible at `now`
    pub fn is_alive(&self, now: SystemTime, lifetime: Duration) -> bool {
        match now.duration_since(self.last_heartbeat) {
            Ok(age) => age <= lifetime,
            // Heartbeat stamped in the future (clock step): still alive
            Err(_) => true,
        }
    }
}

/// In-memory registry keyed by backend url
pub struct RegistryStore {
    records: Mutex<HashMap<String, RegistrationRecord>>,
    lifetime: Duration,
}

impl RegistryStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Insert or refresh the record for `descriptor.url`
    pub async fn register(&self, descriptor: BackendDescriptor) {
        self.register_at(descriptor, SystemTime::now()).await;
    }

    pub async fn register_at(&self, descriptor: BackendDescriptor, at: SystemTime) {
        self.insert(descriptor, None, at).await;
    }

    /// Like `register`, keeping the posted body for listings
    pub async fn register_body(&self, descriptor: BackendDescriptor, body: Value) {
        self.insert(descriptor, Some(body), SystemTime::now()).await;
    }

    async fn insert(&self, descriptor: BackendDescriptor, body: Option<Value>, at: SystemTime) {
        let mut records = self.records.lock().await;
        let url = descriptor.url.clone();
        let refreshed = records
            .insert(
                url.clone(),
                RegistrationRecord {
                    descriptor,
                    body,
                    last_heartbeat: at,
                },
            )
            .is_some();

        if refreshed {
            tracing::debug!("Heartbeat refreshed for {}", url);
        } else {
            tracing::info!("New backend registered: {}", url);
        }
    }

    /// Descriptors whose heartbeat is within the lifetime
    pub async fn list(&self) -> Vec<BackendDescriptor> {
        self.list_at(SystemTime::now()).await
    }

    pub async fn list_at(&self, now: SystemTime) -> Vec<BackendDescriptor> {
        let records = self.records.lock().await;
        records
            .values()
            .filter(|record| record.is_alive(now, self.lifetime))
            .map(|record| record.descriptor.clone())
            .collect()
    }

    /// Visible records as JSON: the posted body when there is one, the
    /// serialized descriptor otherwise
    pub async fn list_bodies(&self) -> Vec<Value> {
        self.list_bodies_at(SystemTime::now()).await
    }

    pub async fn list_bodies_at(&self, now: SystemTime) -> Vec<Value> {
        let records = self.records.lock().await;
        records
            .values()
            .filter(|record| record.is_alive(now, self.lifetime))
            .filter_map(|record| match &record.body {
                Some(body) => Some(body.clone()),
                None => serde_json::to_value(&record.descriptor).ok(),
            })
            .collect()
    }

    /// Drop records that are no longer visible, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(SystemTime::now()).await
    }

    pub async fn purge_expired_at(&self, now: SystemTime) -> usize {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.is_alive(now, self.lifetime));
        before - records.len()
    }

    /// Total stored records, including ones that already aged out
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Start background purge task
    pub async fn start_purge_task(self: Arc<Self>) {
        let purge_interval = (self.lifetime / 4)
            .min(Duration::from_secs(3600))
            .max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(purge_interval);

        loop {
            interval.tick().await;
            let purged = self.purge_expired().await;
            if purged > 0 {
                tracing::debug!("Purged {} expired registrations", purged);
            }
        }
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME)
    }
}
