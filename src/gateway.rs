//! Gateway assembly
//!
//! Wires the configuration into a running set of components. Real engine
//! bindings are registered here by the embedding application; the gateway
//! itself only ships the `echo` backend.
//!
//! ```no_run
//! use lite_gateway::{GatewayBuilder, GatewayConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let gateway = GatewayBuilder::new(GatewayConfig::load(None)?).build().await?;
//! lite_gateway::server::start(gateway.router(), &gateway.config().server).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Result;
use axum::Router;

use crate::config::{GatewayConfig, ModelManifest};
use crate::engine::{
    BackendFactories, BackendFactory, CompletionOrchestrator, ModelRegistry, Scheduler,
    SessionStore, SlotBroker,
};
use crate::server::{self, AppState};
use crate::store::{self, SharedStore};

pub struct GatewayBuilder {
    config: GatewayConfig,
    manifest: Option<ModelManifest>,
    factories: BackendFactories,
    store: Option<Arc<dyn SharedStore>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            manifest: None,
            factories: BackendFactories::builtin(),
            store: None,
        }
    }

    /// Use this manifest instead of locating one in `model_config_dir`
    pub fn with_manifest(mut self, manifest: ModelManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_factory(mut self, kind: impl Into<String>, factory: Arc<dyn BackendFactory>) -> Self {
        self.factories.register(kind, factory);
        self
    }

    /// Use this store instead of connecting to `store_url`
    pub fn with_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<Gateway> {
        let config = self.config;

        let manifest = match self.manifest {
            Some(manifest) => manifest,
            None => ModelManifest::load_for_environment(&config.model_config_dir, &config.environment)?,
        };

        let store = match self.store {
            Some(store) => store,
            None => store::connect_or_unavailable(&config.store_url).await,
        };

        let registry = Arc::new(ModelRegistry::build(
            &manifest,
            &config.model_base_path,
            &self.factories,
        ));
        tracing::info!(
            "Model registry ready: {} configured, {} unavailable",
            registry.list_ids().len(),
            registry.list_ids().iter().filter(|id| registry.is_failed(id)).count()
        );

        let scheduler = Arc::new(
            Scheduler::new(Arc::clone(&registry), self.factories, config.cpu_threads)
                .with_max_loaded(config.max_loaded_models),
        );

        let broker = Arc::new(SlotBroker::new(
            Arc::clone(&store),
            &config.store_key_prefix,
            config.max_concurrent_requests,
            config.slot_timeout(),
        ));
        if let Err(e) = broker.initialize().await {
            tracing::error!("Failed to initialize processing slots: {:#}", e);
        }

        let sessions = SessionStore::new(
            Arc::clone(&store),
            &config.store_key_prefix,
            config.session_ttl(),
        );

        let orchestrator = Arc::new(
            CompletionOrchestrator::new(
                Arc::clone(&scheduler),
                sessions,
                broker,
                config.default_model_id.clone(),
            )
            .with_persist_partial_streams(config.persist_partial_streams),
        );

        let state = Arc::new(AppState::new(
            orchestrator,
            store,
            config.auth_token.clone(),
        ));

        Ok(Gateway {
            config,
            scheduler,
            state,
        })
    }
}

/// Assembled gateway components
pub struct Gateway {
    config: GatewayConfig,
    scheduler: Arc<Scheduler>,
    state: Arc<AppState>,
}

impl Gateway {
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.scheduler.registry()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Router with the configured middleware stack
    pub fn router(&self) -> Router {
        server::router(self.app_state(), &self.config.server)
    }
}
