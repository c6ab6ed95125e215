/// Gateway-local cache of discovered backends
use crate::core::BackendDescriptor;
use crate::registry::client::DiscoveryListener;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Backends grouped by logical name, names ordered by their lowest url
pub type DirectorySnapshot = Vec<(String, Vec<BackendDescriptor>)>;

/// Service directory: one pool of instances per backend name.
///
/// Every update replaces the whole mapping; a backend missing from the latest
/// update is gone until it shows up again.
pub struct ServiceDirectory {
    services: Mutex<Arc<DirectorySnapshot>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Replace the directory with `descriptors`
    pub async fn update(&self, mut descriptors: Vec<BackendDescriptor>) {
        descriptors.sort_by(|a, b| a.url.cmp(&b.url));

        let mut grouped: DirectorySnapshot = Vec::new();
        for descriptor in descriptors {
            match grouped.iter_mut().find(|(name, _)| *name == descriptor.name) {
                Some((_, pool)) => pool.push(descriptor),
                None => grouped.push((descriptor.name.clone(), vec![descriptor])),
            }
        }

        tracing::debug!(
            "Service directory updated: {} names, {} instances",
            grouped.len(),
            grouped.iter().map(|(_, pool)| pool.len()).sum::<usize>()
        );

        *self.services.lock().await = Arc::new(grouped);
    }

    /// Pick one random instance for every name currently present, in
    /// snapshot order
    pub async fn select(&self) -> Vec<BackendDescriptor> {
        let snapshot = self.snapshot().await;
        let mut rng = rand::thread_rng();

        snapshot
            .iter()
            .filter_map(|(_, pool)| pool.choose(&mut rng).cloned())
            .collect()
    }

    /// Instances registered under `name`
    pub async fn pool(&self, name: &str) -> Vec<BackendDescriptor> {
        self.snapshot()
            .await
            .iter()
            .find(|(pool_name, _)| pool_name == name)
            .map(|(_, pool)| pool.clone())
            .unwrap_or_default()
    }

    /// Current grouped mapping
    pub async fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&*self.services.lock().await)
    }

    /// Number of distinct backend names
    pub async fn name_count(&self) -> usize {
        self.services.lock().await.len()
    }
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryListener for ServiceDirectory {
    async fn on_services(&self, services: Vec<BackendDescriptor>) {
        self.update(services).await;
    }
}
