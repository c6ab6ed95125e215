/// Charla - a chat gateway with a minimal heartbeat service registry
///
/// One binary, three roles:
/// 1. Registry: keeps heartbeat registrations of services and lists the live ones
/// 2. Gateway: fans each user query out to discovered answer backends and merges
///    their replies by priority, under per-user admission quotas
/// 3. Canned: a keyword-table answer backend that registers itself like any other
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod server;
pub mod utils;

use crate::config::Config;
use crate::core::{AdmissionController, ConversationHistory, ServiceDirectory};
use crate::error::{CharlaError, CharlaResult};
use crate::gateway::{Gateway, HttpTransport};
use crate::registry::client::{DiscoveryListener, HttpRegistry, RegistryClient, RegistryTasks};
use crate::registry::RegistryStore;
use axum::Router;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Name the canned backend registers under when `[registry.conf]` is absent
pub const DEFAULT_CANNED_NAME: &str = "canned";

/// Which service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Gateway,
    Registry,
    Canned,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Gateway => "gateway",
            Role::Registry => "registry",
            Role::Canned => "canned",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = CharlaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gateway" => Ok(Role::Gateway),
            "registry" => Ok(Role::Registry),
            "canned" => Ok(Role::Canned),
            other => Err(CharlaError::internal(format!("unknown role: {other}"))),
        }
    }
}

/// Everything a role needs besides the listener
struct Assembly {
    router: Router,
    client: Option<RegistryClient>,
    purge: Option<tokio::task::JoinHandle<()>>,
}

/// Main charla instance
pub struct Charla {
    config: Config,
    role: Role,
}

impl Charla {
    pub fn new(config: Config, role: Role) -> Self {
        Self { config, role }
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Bind `server.listen_addr` and serve until shutdown
    pub async fn run(&self) -> CharlaResult<()> {
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener until ctrl-c or `GET /shutdown`
    pub async fn run_on(&self, listener: TcpListener) -> CharlaResult<()> {
        let Assembly {
            router,
            client,
            purge,
        } = self.assemble().await?;

        let shutdown = Arc::new(Notify::new());
        let router = if self.config.server.shutdown_endpoint {
            server::with_shutdown_route(router, Arc::clone(&shutdown))
        } else {
            router
        };

        // Held for the lifetime of the server; dropping stops the loops
        let _tasks: Option<RegistryTasks> = match client {
            Some(client) => Some(client.start().await?),
            None => None,
        };

        tracing::info!(
            "Charla {} listening on {}",
            self.role,
            listener.local_addr()?
        );
        let result = server::serve(listener, router, shutdown).await;

        if let Some(purge) = purge {
            purge.abort();
        }
        tracing::info!("Charla {} stopped", self.role);
        result
    }

    async fn assemble(&self) -> CharlaResult<Assembly> {
        match self.role {
            Role::Registry => {
                let lifetime = Duration::from_secs(self.config.store.lifetime_sec);
                let store = Arc::new(RegistryStore::new(lifetime));
                let purge = tokio::spawn(Arc::clone(&store).start_purge_task());

                Ok(Assembly {
                    router: registry::http::router(store),
                    client: None,
                    purge: Some(purge),
                })
            }
            Role::Gateway => {
                let directory = Arc::new(ServiceDirectory::new());
                if !self.config.gateway.services.is_empty() {
                    directory.update(self.config.gateway.services.clone()).await;
                }
                let quotas = Arc::new(AdmissionController::new(self.config.gateway.quotas));
                let history = Arc::new(ConversationHistory::new(
                    self.config.gateway.history_capacity,
                ));
                let transport = Arc::new(HttpTransport::new()?);

                let listener: Arc<dyn DiscoveryListener> = directory.clone();
                let client = self.registry_client(Some(listener))?;

                let gateway = Arc::new(Gateway::new(directory, quotas, history, transport));
                Ok(Assembly {
                    router: gateway::http::router(gateway),
                    client,
                    purge: None,
                })
            }
            Role::Canned => {
                let name = self
                    .config
                    .registry
                    .conf
                    .as_ref()
                    .map(|conf| conf.name.clone())
                    .unwrap_or_else(|| DEFAULT_CANNED_NAME.to_string());

                Ok(Assembly {
                    router: gateway::http::canned_router(name),
                    client: self.registry_client(None)?,
                    purge: None,
                })
            }
        }
    }

    fn registry_client(
        &self,
        listener: Option<Arc<dyn DiscoveryListener>>,
    ) -> CharlaResult<Option<RegistryClient>> {
        let registry = &self.config.registry;
        let url = match &registry.url {
            Some(url) if registry.is_enabled() => url,
            _ => return Ok(None),
        };

        let api = Arc::new(HttpRegistry::new(url.clone(), registry.timeout())?);
        RegistryClient::from_config(api, registry, listener).map(Some)
    }
}
