/// Registry client: self-heartbeat and periodic service discovery
use crate::config::RegistryConfig;
use crate::core::BackendDescriptor;
use crate::error::{CharlaError, CharlaResult};
use crate::registry::RegistryStore;
use crate::utils::{format_duration, local_ip};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_REGISTER_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(180);

const IP_PLACEHOLDER: &str = "{ip}";

/// Operations the client needs from a registry
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Publish or refresh a descriptor
    async fn register(&self, descriptor: &BackendDescriptor) -> CharlaResult<()>;

    /// Fetch every currently visible descriptor
    async fn list(&self) -> CharlaResult<Vec<BackendDescriptor>>;
}

/// Receives the filtered service list after every discovery round
#[async_trait]
pub trait DiscoveryListener: Send + Sync {
    async fn on_services(&self, services: Vec<BackendDescriptor>);
}

/// Registry reached over HTTP (`POST /register`, `GET /get`)
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CharlaResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RegistryApi for HttpRegistry {
    async fn register(&self, descriptor: &BackendDescriptor) -> CharlaResult<()> {
        self.client
            .post(format!("{}/register", self.base_url))
            .json(descriptor)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list(&self) -> CharlaResult<Vec<BackendDescriptor>> {
        let services = self
            .client
            .get(format!("{}/get", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(services)
    }
}

/// In-process registry, used when the store lives in the same binary
#[async_trait]
impl RegistryApi for RegistryStore {
    async fn register(&self, descriptor: &BackendDescriptor) -> CharlaResult<()> {
        RegistryStore::register(self, descriptor.clone()).await;
        Ok(())
    }

    async fn list(&self) -> CharlaResult<Vec<BackendDescriptor>> {
        Ok(RegistryStore::list(self).await)
    }
}

/// Replace the `{ip}` placeholder in a url template
pub fn substitute_ip(url: &str, ip: IpAddr) -> String {
    url.replace(IP_PLACEHOLDER, &ip.to_string())
}

/// Keeps this process registered and the local directory fresh.
///
/// Both loops are best-effort: a failed round is logged and the next one runs
/// on schedule.
pub struct RegistryClient {
    api: Arc<dyn RegistryApi>,
    descriptor: Option<BackendDescriptor>,
    services_names: HashSet<String>,
    listener: Option<Arc<dyn DiscoveryListener>>,
    register_period: Duration,
    update_period: Duration,
}

impl RegistryClient {
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self {
            api,
            descriptor: None,
            services_names: HashSet::new(),
            listener: None,
            register_period: DEFAULT_REGISTER_PERIOD,
            update_period: DEFAULT_UPDATE_PERIOD,
        }
    }

    /// Build a client from the `[registry]` section
    pub fn from_config(
        api: Arc<dyn RegistryApi>,
        config: &RegistryConfig,
        listener: Option<Arc<dyn DiscoveryListener>>,
    ) -> CharlaResult<Self> {
        let mut client = Self::new(api).with_periods(
            Duration::from_secs(config.register_period_sec),
            Duration::from_secs(config.update_period_sec),
        );

        if let Some(descriptor) = &config.conf {
            client = client.with_descriptor(descriptor.clone())?;
        }
        if let Some(listener) = listener {
            client = client.with_discovery(config.services_names.iter().cloned(), listener);
        }
        Ok(client)
    }

    /// Publish `descriptor`, resolving `{ip}` in its url once, now
    pub fn with_descriptor(mut self, mut descriptor: BackendDescriptor) -> CharlaResult<Self> {
        if descriptor.url.contains(IP_PLACEHOLDER) {
            descriptor.url = substitute_ip(&descriptor.url, local_ip()?);
        }
        self.descriptor = Some(descriptor);
        Ok(self)
    }

    pub fn with_descriptor_for_ip(mut self, mut descriptor: BackendDescriptor, ip: IpAddr) -> Self {
        descriptor.url = substitute_ip(&descriptor.url, ip);
        self.descriptor = Some(descriptor);
        self
    }

    /// Deliver services named in `names` to `listener` on every discovery round
    pub fn with_discovery(
        mut self,
        names: impl IntoIterator<Item = String>,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Self {
        self.services_names = names.into_iter().collect();
        self.listener = Some(listener);
        self
    }

    pub fn with_periods(mut self, register_period: Duration, update_period: Duration) -> Self {
        self.register_period = register_period;
        self.update_period = update_period;
        self
    }

    /// Descriptor this process publishes, with `{ip}` already substituted
    pub fn descriptor(&self) -> Option<&BackendDescriptor> {
        self.descriptor.as_ref()
    }

    fn discovery_enabled(&self) -> bool {
        !self.services_names.is_empty() && self.listener.is_some()
    }

    /// One discovery round: list, filter by name, hand to the listener.
    /// Returns the number of descriptors delivered.
    pub async fn update_services(&self) -> CharlaResult<usize> {
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return Ok(0),
        };

        let services: Vec<BackendDescriptor> = self
            .api
            .list()
            .await?
            .into_iter()
            .filter(|service| self.services_names.contains(&service.name))
            .collect();
        let found = services.len();

        tracing::debug!("Discovery found {} matching services", found);
        listener.on_services(services).await;
        Ok(found)
    }

    /// One heartbeat
    pub async fn register_service(&self) -> CharlaResult<()> {
        match &self.descriptor {
            Some(descriptor) => self.api.register(descriptor).await,
            None => Ok(()),
        }
    }

    /// Run the initial discovery round and spawn both loops.
    ///
    /// Fails when discovery is configured but the first round finds nothing.
    pub async fn start(self) -> CharlaResult<RegistryTasks> {
        let client = Arc::new(self);
        let mut handles = Vec::new();

        if client.discovery_enabled() {
            let found = client.update_services().await?;
            if found == 0 {
                let mut names: Vec<&str> =
                    client.services_names.iter().map(String::as_str).collect();
                names.sort_unstable();
                return Err(CharlaError::registry(format!(
                    "initial discovery found no services named {:?}",
                    names
                )));
            }
        }

        if let Some(descriptor) = &client.descriptor {
            tracing::info!(
                "Registering {} at {} every {}",
                descriptor.name,
                descriptor.url,
                format_duration(client.register_period)
            );
            handles.push(tokio::spawn(Arc::clone(&client).register_loop()));
        }

        if client.discovery_enabled() {
            tracing::info!(
                "Refreshing services every {}",
                format_duration(client.update_period)
            );
            handles.push(tokio::spawn(Arc::clone(&client).discovery_loop()));
        }

        Ok(RegistryTasks { handles })
    }

    async fn register_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.register_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.register_service().await {
                tracing::warn!("Service register failed: {}", e);
            }
        }
    }

    async fn discovery_loop(self: Arc<Self>) {
        // The first round already ran in `start`
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.update_period, self.update_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.update_services().await {
                tracing::warn!("Service discovery failed: {}", e);
            }
        }
    }
}

/// Handles of the running registry loops; dropping stops them
#[derive(Debug)]
pub struct RegistryTasks {
    handles: Vec<JoinHandle<()>>,
}

impl RegistryTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for RegistryTasks {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ServiceDirectory;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FailingRegistry {
        registers: AtomicUsize,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl RegistryApi for FailingRegistry {
        async fn register(&self, _descriptor: &BackendDescriptor) -> CharlaResult<()> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            Err(CharlaError::registry("registry unreachable"))
        }

        async fn list(&self) -> CharlaResult<Vec<BackendDescriptor>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Err(CharlaError::registry("registry unreachable"))
        }
    }

    /// Store-backed registry that can be switched off
    struct FlakyRegistry {
        store: RegistryStore,
        down: AtomicBool,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl RegistryApi for FlakyRegistry {
        async fn register(&self, descriptor: &BackendDescriptor) -> CharlaResult<()> {
            self.store.register(descriptor.clone()).await;
            Ok(())
        }

        async fn list(&self) -> CharlaResult<Vec<BackendDescriptor>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(CharlaError::registry("registry unreachable"));
            }
            Ok(self.store.list().await)
        }
    }

    fn backend(name: &str, url: &str) -> BackendDescriptor {
        BackendDescriptor::new(name, url)
    }

    #[test]
    fn test_substitute_ip() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(
            substitute_ip("http://{ip}:5000/api", ip),
            "http://10.1.2.3:5000/api"
        );
        assert_eq!(substitute_ip("http://host:5000/api", ip), "http://host:5000/api");
    }

    #[test]
    fn test_descriptor_without_placeholder_is_kept() {
        let store = Arc::new(RegistryStore::default());
        let client = RegistryClient::new(store)
            .with_descriptor(backend("gen", "http://gen.internal:5000/api"))
            .unwrap();
        assert_eq!(client.descriptor().unwrap().url, "http://gen.internal:5000/api");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_registers_periodically() {
        let store = Arc::new(RegistryStore::default());
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        let client = RegistryClient::new(store.clone())
            .with_descriptor_for_ip(backend("gen", "http://{ip}:5000/api"), ip)
            .with_periods(Duration::from_secs(60), Duration::from_secs(180));

        let tasks = client.start().await.unwrap();
        assert_eq!(tasks.len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let listed = store.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].url, "http://10.0.0.7:5000/api");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_filters_and_refreshes() {
        let store = Arc::new(RegistryStore::default());
        store.register(backend("gen", "http://10.0.0.1/api")).await;
        store.register(backend("aggregator", "http://10.0.0.9/api")).await;

        let directory = Arc::new(ServiceDirectory::new());
        let client = RegistryClient::new(store.clone())
            .with_discovery(
                vec!["gen".to_string(), "wiki".to_string()],
                directory.clone(),
            )
            .with_periods(Duration::from_secs(60), Duration::from_secs(180));

        let _tasks = client.start().await.unwrap();

        // Initial round ran synchronously inside start
        assert_eq!(directory.name_count().await, 1);
        assert_eq!(directory.pool("gen").await.len(), 1);

        store.register(backend("wiki", "http://10.0.0.2/api")).await;
        tokio::time::sleep(Duration::from_secs(181)).await;

        assert_eq!(directory.name_count().await, 2);
        assert!(directory.pool("aggregator").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_initial_discovery_fails() {
        let store = Arc::new(RegistryStore::default());
        store.register(backend("other", "http://10.0.0.1/api")).await;

        let directory = Arc::new(ServiceDirectory::new());
        let client = RegistryClient::new(store)
            .with_discovery(vec!["gen".to_string()], directory);

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, CharlaError::Registry { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_survive_failures() {
        let registry = Arc::new(FailingRegistry {
            registers: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        });
        let client = RegistryClient::new(registry.clone())
            .with_descriptor_for_ip(backend("gen", "http://10.0.0.1/api"), "10.0.0.1".parse().unwrap())
            .with_periods(Duration::from_secs(60), Duration::from_secs(180));

        let _tasks = client.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60 * 3 + 1)).await;

        assert!(registry.registers.load(Ordering::SeqCst) >= 4);
        assert_eq!(registry.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_keeps_snapshot_through_outage() {
        let registry = Arc::new(FlakyRegistry {
            store: RegistryStore::default(),
            down: AtomicBool::new(false),
            lists: AtomicUsize::new(0),
        });
        registry.store.register(backend("gen", "http://10.0.0.1/api")).await;

        let directory = Arc::new(ServiceDirectory::new());
        let client = RegistryClient::new(registry.clone())
            .with_discovery(
                vec!["gen".to_string(), "wiki".to_string()],
                directory.clone(),
            )
            .with_periods(Duration::from_secs(60), Duration::from_secs(180));

        let _tasks = client.start().await.unwrap();
        assert_eq!(directory.name_count().await, 1);

        // Two rounds fail; the last good snapshot stays in place
        registry.down.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(361)).await;
        assert_eq!(registry.lists.load(Ordering::SeqCst), 3);
        assert_eq!(directory.name_count().await, 1);
        assert_eq!(directory.pool("gen").await[0].url, "http://10.0.0.1/api");

        // The loop is still running and picks up changes once the registry is back
        registry.store.register(backend("wiki", "http://10.0.0.2/api")).await;
        registry.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(registry.lists.load(Ordering::SeqCst), 4);
        assert_eq!(directory.name_count().await, 2);
        assert_eq!(directory.pool("wiki").await.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_tasks_stops_loops() {
        let store = Arc::new(RegistryStore::default());
        let client = RegistryClient::new(store)
            .with_descriptor_for_ip(backend("gen", "http://10.0.0.1/api"), "10.0.0.1".parse().unwrap());

        let tasks = client.start().await.unwrap();
        assert!(!tasks.is_empty());
        drop(tasks);
    }
}
