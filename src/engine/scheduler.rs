//! Model scheduler for lifecycle management
//!
//! Loads backends on first use, exactly once per model even when many
//! requests arrive for the same cold model, and optionally evicts the
//! least-recently-used backend when a residency limit is set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

use super::backend::{BackendFactories, BackendSpec};
use super::executor::Executor;
use super::registry::{ModelDescriptor, ModelRegistry};
use crate::config::{merge_params, BackendParams, ParamMap};

/// Why a backend could not be handed out
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The id has no descriptor or load lock
    #[error("model '{0}' is not configured")]
    Unconfigured(String),

    /// Construction failed, now or earlier; the reason is recorded
    #[error("{reason}")]
    Failed { id: String, reason: String },
}

/// Model scheduler
///
/// Manages model lifecycle including:
/// - Loading models on demand
/// - Caching loaded models
/// - Evicting least-recently-used models when a limit is set
pub struct Scheduler {
    registry: Arc<ModelRegistry>,
    factories: BackendFactories,
    /// Forced into every constructor as `n_threads`
    cpu_threads: usize,
    /// Maximum number of loaded models (0 = unbounded)
    max_loaded: usize,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(registry: Arc<ModelRegistry>, factories: BackendFactories, cpu_threads: usize) -> Self {
        Self {
            registry,
            factories,
            cpu_threads,
            max_loaded: 0,
        }
    }

    /// Set maximum number of concurrently loaded models
    pub fn with_max_loaded(mut self, max: usize) -> Self {
        self.max_loaded = max;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Get an executor for a model, loading it if necessary
    pub async fn get_backend(&self, model_id: &str) -> Result<Arc<Executor>, LoadError> {
        // Check if already loaded
        if let Some(executor) = self.registry.instance(model_id) {
            return Ok(executor);
        }

        self.load_model(model_id).await
    }

    /// Merge parameters for one model in precedence order: global
    /// constructor defaults, global generation defaults, model params,
    /// chat format, then forced runtime values.
    pub fn merged_params(&self, descriptor: &ModelDescriptor) -> BackendParams {
        let defaults = self.registry.defaults();
        let model = descriptor.params();

        let mut forced = ParamMap::new();
        if let Some(format) = &descriptor.chat_format {
            forced.insert("chat_format".to_string(), Value::from(format.clone()));
        }
        forced.insert("n_threads".to_string(), Value::from(self.cpu_threads));

        BackendParams::split(merge_params([
            &defaults.constructor,
            &defaults.generation,
            &model,
            &forced,
        ]))
    }

    /// Load a model by canonical id
    async fn load_model(&self, model_id: &str) -> Result<Arc<Executor>, LoadError> {
        let lock = self
            .registry
            .load_lock(model_id)
            .ok_or_else(|| LoadError::Unconfigured(model_id.to_string()))?;

        // Owned guard: it moves into the construction task, so a caller
        // that gives up waiting cannot let a second construction start.
        let guard = lock.lock_owned().await;

        // Another caller may have finished while we waited for the lock
        if let Some(executor) = self.registry.instance(model_id) {
            return Ok(executor);
        }
        if let Some(reason) = self.registry.failure_reason(model_id) {
            return Err(LoadError::Failed {
                id: model_id.to_string(),
                reason,
            });
        }

        let descriptor = self
            .registry
            .descriptor(model_id)
            .ok_or_else(|| LoadError::Unconfigured(model_id.to_string()))?;

        let Some(factory) = self.factories.get(&descriptor.backend_kind) else {
            let reason = format!(
                "Unknown model_type '{}' for model '{}'",
                descriptor.backend_kind, model_id
            );
            self.registry.record_failure(model_id, reason.clone());
            return Err(LoadError::Failed {
                id: model_id.to_string(),
                reason,
            });
        };

        let params = self.merged_params(descriptor);
        let spec = BackendSpec {
            model_id: descriptor.id.clone(),
            backend_kind: descriptor.backend_kind.clone(),
            model_path: descriptor.file_path.clone(),
            constructor_params: params.constructor,
        };
        let generation_defaults = params.generation;
        let registry = Arc::clone(&self.registry);
        let id = model_id.to_string();

        tracing::info!("Loading model '{}'...", model_id);

        let outcome = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let start = Instant::now();

            let constructed = catch_unwind(AssertUnwindSafe(|| factory.construct(&spec)));
            match constructed {
                Ok(Ok(backend)) => {
                    let executor = Arc::new(Executor::new(id.clone(), backend, generation_defaults));
                    registry.publish(&id, Arc::clone(&executor));
                    tracing::info!("Successfully loaded model '{}' in {:?}", id, start.elapsed());
                    Ok(executor)
                }
                Ok(Err(e)) => {
                    let reason = format!("{:#}", e);
                    tracing::error!("Error loading model '{}': {}", id, reason);
                    registry.record_failure(&id, reason.clone());
                    Err(reason)
                }
                Err(_) => {
                    let reason = "backend constructor panicked".to_string();
                    tracing::error!("Error loading model '{}': {}", id, reason);
                    registry.record_failure(&id, reason.clone());
                    Err(reason)
                }
            }
        })
        .await;

        let executor = match outcome {
            Ok(Ok(executor)) => executor,
            Ok(Err(reason)) => {
                return Err(LoadError::Failed {
                    id: model_id.to_string(),
                    reason,
                })
            }
            Err(e) => {
                return Err(LoadError::Failed {
                    id: model_id.to_string(),
                    reason: format!("load task aborted: {}", e),
                })
            }
        };

        if self.max_loaded > 0 {
            for evicted in self.registry.evict_lru(self.max_loaded, model_id) {
                tracing::info!("Evicting model: {}", evicted);
            }
        }

        Ok(executor)
    }

    /// Load models eagerly; failures are recorded and logged, not returned
    pub async fn preload(&self, model_ids: &[String]) {
        for requested in model_ids {
            let id = match self.registry.resolve(requested) {
                Ok(descriptor) => descriptor.id.clone(),
                Err(e) => {
                    tracing::warn!("Cannot preload: {}", e);
                    continue;
                }
            };
            tracing::info!("Pre-loading model: {}", id);
            if let Err(e) = self.get_backend(&id).await {
                tracing::warn!("Pre-loading '{}' failed: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;
    use serde_json::json;

    use crate::config::{ModelEntry, ModelManifest, ParamDefaults};
    use crate::engine::backend::{Backend, BackendFactory, ChunkIter};
    use crate::types::{ChatCompletion, ChatMessage};

    struct Idle;

    impl Backend for Idle {
        fn create_chat_completion(&self, _: &[ChatMessage], _: &ParamMap) -> Result<ChatCompletion> {
            Ok(ChatCompletion::new("idle", ChatMessage::assistant(""), "stop"))
        }

        fn create_chat_completion_stream(&self, _: &[ChatMessage], _: &ParamMap) -> Result<ChunkIter> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    /// Counts constructions; slow, and optionally failing or panicking
    #[derive(Default)]
    struct CountingFactory {
        constructions: AtomicUsize,
        fail: Option<String>,
        panic: bool,
        specs: Mutex<Vec<BackendSpec>>,
    }

    impl BackendFactory for CountingFactory {
        fn requires_model_file(&self) -> bool {
            false
        }

        fn construct(&self, spec: &BackendSpec) -> Result<Box<dyn Backend>> {
            self.constructions.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().unwrap().push(spec.clone());
            std::thread::sleep(Duration::from_millis(50));
            if self.panic {
                panic!("constructor blew up");
            }
            match &self.fail {
                Some(reason) => Err(anyhow::anyhow!(reason.clone())),
                None => Ok(Box::new(Idle)),
            }
        }
    }

    fn scheduler(factory: Arc<CountingFactory>, ids: &[&str], defaults: ParamDefaults) -> Scheduler {
        let mut factories = BackendFactories::new();
        factories.register("counting", factory);
        let models = ids
            .iter()
            .map(|id| ModelEntry {
                id: Some(id.to_string()),
                model_type: Some("counting".to_string()),
                ..Default::default()
            })
            .collect();
        let manifest = ModelManifest::new(defaults, models);
        let registry = Arc::new(ModelRegistry::build(&manifest, Path::new("/"), &factories));
        Scheduler::new(registry, factories, 6)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_load_constructs_once() {
        let factory = Arc::new(CountingFactory::default());
        let scheduler = Arc::new(scheduler(Arc::clone(&factory), &["m"], ParamDefaults::default()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move { scheduler.get_backend("m").await })
            })
            .collect();

        let mut executors = Vec::new();
        for handle in handles {
            executors.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
        assert!(executors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(scheduler.registry().is_loaded("m"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_load_shares_failure() {
        let factory = Arc::new(CountingFactory {
            fail: Some("bad weights".to_string()),
            ..Default::default()
        });
        let scheduler = Arc::new(scheduler(Arc::clone(&factory), &["m"], ParamDefaults::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move { scheduler.get_backend("m").await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(
                err,
                LoadError::Failed {
                    id: "m".to_string(),
                    reason: "bad weights".to_string()
                }
            );
        }
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);

        // Never retried
        assert!(scheduler.get_backend("m").await.is_err());
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.registry().failure_reason("m").as_deref(),
            Some("bad weights")
        );
    }

    #[tokio::test]
    async fn test_constructor_panic_is_recorded() {
        let factory = Arc::new(CountingFactory {
            panic: true,
            ..Default::default()
        });
        let scheduler = scheduler(Arc::clone(&factory), &["m"], ParamDefaults::default());

        let err = scheduler.get_backend("m").await.unwrap_err();
        assert!(matches!(err, LoadError::Failed { .. }));
        assert!(scheduler.registry().is_failed("m"));
        assert!(scheduler.get_backend("m").await.is_err());
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_id() {
        let factory = Arc::new(CountingFactory::default());
        let scheduler = scheduler(factory, &["m"], ParamDefaults::default());
        assert_eq!(
            scheduler.get_backend("other").await.unwrap_err(),
            LoadError::Unconfigured("other".to_string())
        );
    }

    #[tokio::test]
    async fn test_param_precedence() {
        let defaults = ParamDefaults {
            constructor: json!({"n_ctx": 512, "n_threads": 99, "temperature": 1.0})
                .as_object()
                .cloned()
                .unwrap(),
            generation: json!({"temperature": 0.8, "top_k": 40})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let factory = Arc::new(CountingFactory::default());
        let mut factories = BackendFactories::new();
        factories.register("counting", Arc::clone(&factory) as Arc<dyn BackendFactory>);
        let manifest = ModelManifest::new(
            defaults,
            vec![ModelEntry {
                id: Some("m".to_string()),
                model_type: Some("counting".to_string()),
                chat_format: Some("chatml".to_string()),
                params: json!({"n_ctx": 4096, "top_k": 20})
                    .as_object()
                    .cloned()
                    .unwrap(),
                ..Default::default()
            }],
        );
        let registry = Arc::new(ModelRegistry::build(&manifest, Path::new("/"), &factories));
        let scheduler = Scheduler::new(registry, factories, 6);

        let executor = scheduler.get_backend("m").await.unwrap();
        let spec = factory.specs.lock().unwrap()[0].clone();

        // model params beat global defaults
        assert_eq!(spec.constructor_params["n_ctx"], 4096);
        // forced runtime value beats everything
        assert_eq!(spec.constructor_params["n_threads"], 6);
        assert_eq!(spec.constructor_params["chat_format"], "chatml");
        assert_eq!(spec.constructor_params["verbose"], false);
        // generation defaults beat constructor defaults for the same key
        assert_eq!(executor.generation_defaults()["temperature"], 0.8);
        assert_eq!(executor.generation_defaults()["top_k"], 20);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let factory = Arc::new(CountingFactory::default());
        let scheduler = scheduler(Arc::clone(&factory), &["a", "b", "c"], ParamDefaults::default())
            .with_max_loaded(2);

        scheduler.get_backend("a").await.unwrap();
        scheduler.get_backend("b").await.unwrap();
        // touch a so b becomes least recently used
        scheduler.get_backend("a").await.unwrap();
        scheduler.get_backend("c").await.unwrap();

        assert_eq!(scheduler.registry().loaded_ids(), vec!["a", "c"]);
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 3);

        // evicted model reloads on demand
        scheduler.get_backend("b").await.unwrap();
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_preload_skips_unknown() {
        let factory = Arc::new(CountingFactory::default());
        let scheduler = scheduler(Arc::clone(&factory), &["Alpha"], ParamDefaults::default());
        scheduler
            .preload(&["alpha".to_string(), "missing".to_string()])
            .await;
        assert!(scheduler.registry().is_loaded("Alpha"));
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
    }
}
