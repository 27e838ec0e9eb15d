//! The assembled runtime: every component built from one configuration.

use std::sync::Arc;
use std::time::Instant;

use switchyard_core::{ClockSource, ServiceMetadata, SystemClock};
use tracing::info;

use crate::admission::AdmissionQueue;
use crate::cache::{ConnectionCache, MemoryCacheStore};
use crate::health::{HealthMonitor, HealthProber};
use crate::local::{LocalTarget, MountReport, Mounter};
use crate::network::{AdminServer, AppState, ShutdownController};
use crate::registry::{MemoryRegistryStore, Registry, RegistryStore, SyncSummary};
use crate::remote::{HttpTransport, RemoteTransport};
use crate::service::{
    CallClient, ComponentContext, ComponentRegistry, ConnectionRouter, SwitchyardConfig,
};

/// A running switchyard instance.
///
/// Components are initialized in dependency order by [`Switchyard::start`]
/// and shut down in reverse by [`Switchyard::stop`]: the health monitor
/// stops first, then admitted calls drain, then local targets detach.
pub struct Switchyard {
    config: Arc<SwitchyardConfig>,
    registry: Arc<Registry>,
    cache: Arc<ConnectionCache>,
    mounter: Arc<Mounter>,
    queue: Arc<AdmissionQueue>,
    monitor: Arc<HealthMonitor>,
    client: CallClient,
    components: ComponentRegistry,
    shutdown: Arc<ShutdownController>,
}

impl Switchyard {
    /// Builds an instance with an in-memory registry and the HTTP transport.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the HTTP client cannot be
    /// built.
    pub fn new(config: SwitchyardConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(
            config.remote.call_timeout,
            config.remote.service_token.clone(),
        )?;
        Self::with_parts(
            config,
            Arc::new(MemoryRegistryStore::new()),
            Arc::new(transport),
            Arc::new(SystemClock),
        )
    }

    /// Builds an instance from explicit backends.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn with_parts(
        config: SwitchyardConfig,
        store: Arc<dyn RegistryStore>,
        transport: Arc<dyn RemoteTransport>,
        clock: Arc<dyn ClockSource>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let registry = Arc::new(Registry::new(store, Arc::clone(&clock)));
        let cache = Arc::new(ConnectionCache::new(
            Arc::new(MemoryCacheStore::new(clock)),
            Arc::clone(&registry),
            config.cache.clone(),
        ));
        registry.add_observer(Arc::new(cache.invalidator()));

        let mounter = Arc::new(Mounter::new(Arc::clone(&registry), Arc::clone(&cache)));
        let queue = Arc::new(AdmissionQueue::new(&config.admission));

        let router = ConnectionRouter::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&mounter),
            Arc::clone(&transport),
        );
        let prober = HealthProber::new(
            Arc::clone(&registry),
            Arc::clone(&mounter),
            transport,
            Arc::clone(&queue),
            config.health.probe_timeout,
        );
        let monitor = Arc::new(HealthMonitor::new(prober, config.health.clone()));
        let client = CallClient::new(router, Arc::clone(&queue));

        let components = ComponentRegistry::new();
        components.register(Arc::clone(&registry));
        components.register(Arc::clone(&cache));
        components.register(Arc::clone(&mounter));
        components.register(Arc::clone(&queue));
        components.register(Arc::clone(&monitor));

        Ok(Self {
            config,
            registry,
            cache,
            mounter,
            queue,
            monitor,
            client,
            components,
            shutdown: Arc::new(ShutdownController::new()),
        })
    }

    /// Makes an in-process implementation of `name` available.
    ///
    /// # Errors
    ///
    /// Fails if the registry cannot be updated.
    pub async fn register_local(
        &self,
        name: &str,
        target: Arc<dyn LocalTarget>,
    ) -> anyhow::Result<bool> {
        Ok(self.mounter.register(name, target).await?)
    }

    /// Applies a discovery snapshot, then re-mounts local targets.
    ///
    /// # Errors
    ///
    /// Fails if the registry backend fails.
    pub async fn discover(
        &self,
        services: &[ServiceMetadata],
    ) -> anyhow::Result<(SyncSummary, MountReport)> {
        let summary = self.registry.sync_discovered(services).await?;
        info!(
            created = summary.created.len(),
            updated = summary.updated.len(),
            deactivated = summary.deactivated.len(),
            rejected = summary.rejected.len(),
            "discovery applied"
        );
        let mounts = self.mounter.reconcile().await?;
        Ok((summary, mounts))
    }

    /// Initializes every component in order.
    ///
    /// # Errors
    ///
    /// Returns the first component initialization failure.
    pub async fn start(&self) -> anyhow::Result<()> {
        let ctx = ComponentContext {
            config: Arc::clone(&self.config),
        };
        self.components.init_all(&ctx).await?;
        info!(components = ?self.components.names(), "switchyard started");
        Ok(())
    }

    /// Shuts every component down in reverse order. `terminate` skips
    /// draining admitted calls.
    ///
    /// # Errors
    ///
    /// Returns the first component shutdown failure; the rest still run.
    pub async fn stop(&self, terminate: bool) -> anyhow::Result<()> {
        self.shutdown.begin_shutdown();
        self.components.shutdown_all(terminate).await?;
        info!("switchyard stopped");
        Ok(())
    }

    /// The admin HTTP surface over this instance.
    #[must_use]
    pub fn admin_server(&self) -> AdminServer {
        AdminServer::new(AppState {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            mounter: Arc::clone(&self.mounter),
            monitor: Arc::clone(&self.monitor),
            queue: Arc::clone(&self.queue),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.admin.clone()),
            start_time: Instant::now(),
        })
    }

    #[must_use]
    pub fn client(&self) -> &CallClient {
        &self.client
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    #[must_use]
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }
}
