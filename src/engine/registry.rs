//! Model registry
//!
//! Holds the static descriptor of every configured model plus the two
//! append-only tables filled at runtime: loaded executors and load
//! failures. Built once at startup and shared by handle; descriptors are
//! never mutated afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use super::backend::BackendFactories;
use super::executor::Executor;
use crate::config::{
    is_constructor_key, read_params_file, ModelEntry, ModelManifest, ParamDefaults, ParamMap,
};
use crate::error::GatewayError;

/// Static configuration of one model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Canonical id as written in the manifest
    pub id: String,
    pub backend_kind: String,
    /// Resolved against the model base path
    pub file_path: Option<PathBuf>,
    pub constructor_params: ParamMap,
    pub generation_defaults: ParamMap,
    pub system_prompt: Option<String>,
    pub chat_format: Option<String>,
}

impl ModelDescriptor {
    /// Constructor and generation params of this model, merged
    pub fn params(&self) -> ParamMap {
        let mut params = self.generation_defaults.clone();
        for (key, value) in &self.constructor_params {
            params.insert(key.clone(), value.clone());
        }
        params
    }
}

struct LoadedEntry {
    executor: Arc<Executor>,
    /// Logical access time for LRU eviction
    last_accessed: AtomicU64,
}

/// Registry of configured models
pub struct ModelRegistry {
    /// Descriptors in manifest order
    descriptors: Vec<ModelDescriptor>,
    /// Lowercased id -> index into `descriptors`
    index: HashMap<String, usize>,
    /// Global defaults from the manifest
    defaults: ParamDefaults,
    /// Canonical id -> loaded executor
    instances: RwLock<HashMap<String, LoadedEntry>>,
    /// Canonical id -> failure reason (write-once)
    failures: RwLock<HashMap<String, String>>,
    /// One load lock per configured id, created up front
    load_locks: HashMap<String, Arc<Mutex<()>>>,
    clock: AtomicU64,
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl ModelRegistry {
    /// Build the registry from a manifest.
    ///
    /// Models that cannot possibly load (unknown kind, missing file,
    /// unreadable default-params file) are recorded as failed here so that
    /// requests for them fail fast without touching the filesystem again.
    pub fn build(
        manifest: &ModelManifest,
        model_base_path: &Path,
        factories: &BackendFactories,
    ) -> Self {
        let mut descriptors = Vec::new();
        let mut index = HashMap::new();
        let mut failures = HashMap::new();

        for entry in &manifest.models {
            let Some(id) = entry.id.clone() else {
                tracing::warn!("Skipping model config due to missing 'id'.");
                continue;
            };
            let key = id.to_lowercase();
            if index.contains_key(&key) {
                tracing::warn!("Duplicate model id '{}' in configuration; keeping the first.", id);
                continue;
            }

            let (descriptor, failure) =
                Self::describe(entry, &id, manifest.base_dir.as_deref(), model_base_path, factories);
            if let Some(reason) = failure {
                tracing::warn!("Model '{}' is unavailable: {}", id, reason);
                failures.insert(id.clone(), reason);
            }

            index.insert(key, descriptors.len());
            descriptors.push(descriptor);
        }

        let load_locks = descriptors
            .iter()
            .map(|d| (d.id.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            descriptors,
            index,
            defaults: manifest.defaults.clone(),
            instances: RwLock::new(HashMap::new()),
            failures: RwLock::new(failures),
            load_locks,
            clock: AtomicU64::new(0),
        }
    }

    /// Descriptor for one entry, plus the reason it can never load (if any)
    fn describe(
        entry: &ModelEntry,
        id: &str,
        manifest_dir: Option<&Path>,
        model_base_path: &Path,
        factories: &BackendFactories,
    ) -> (ModelDescriptor, Option<String>) {
        let backend_kind = entry.model_type.clone().unwrap_or_default();
        let file_path = entry
            .path
            .as_deref()
            .map(|p| resolve_path(model_base_path, p));

        let mut failure = None;
        let mut params = ParamMap::new();

        if let Some(file) = &entry.default_params_file {
            let file = match manifest_dir {
                Some(dir) => resolve_path(dir, file),
                None => file.clone(),
            };
            match read_params_file(&file) {
                Ok(defaults) => params.extend(defaults),
                Err(e) => failure = Some(format!("{:#}", e)),
            }
        }
        params.extend(entry.params.clone());

        let (constructor_params, generation_defaults) = params
            .into_iter()
            .partition::<ParamMap, _>(|(key, _)| is_constructor_key(key));

        match factories.get(&backend_kind) {
            None => {
                failure.get_or_insert_with(|| {
                    format!("Unknown model_type '{}' for model '{}'", backend_kind, id)
                });
            }
            Some(factory) if factory.requires_model_file() => match &file_path {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    failure.get_or_insert_with(|| {
                        format!("Model path '{}' for '{}' not found", path.display(), id)
                    });
                }
                None => {
                    failure.get_or_insert_with(|| format!("No model path configured for '{}'", id));
                }
            },
            Some(_) => {}
        }

        let descriptor = ModelDescriptor {
            id: id.to_string(),
            backend_kind,
            file_path,
            constructor_params,
            generation_defaults,
            system_prompt: entry.system_prompt.clone(),
            chat_format: entry.chat_format.clone(),
        };
        (descriptor, failure)
    }

    /// Case-insensitive lookup returning the canonical descriptor
    pub fn resolve(&self, requested: &str) -> Result<&ModelDescriptor, GatewayError> {
        self.index
            .get(&requested.to_lowercase())
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| GatewayError::NotFound {
                requested: requested.to_string(),
                available: self.list_ids(),
            })
    }

    /// Descriptor by canonical id
    pub fn descriptor(&self, id: &str) -> Option<&ModelDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    /// Configured ids in manifest order
    pub fn list_ids(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id.clone()).collect()
    }

    pub fn defaults(&self) -> &ParamDefaults {
        &self.defaults
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failure_reason(id).is_some()
    }

    pub fn failure_reason(&self, id: &str) -> Option<String> {
        self.failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Record a load failure; the first reason recorded for an id wins
    pub fn record_failure(&self, id: &str, reason: impl Into<String>) {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_insert_with(|| reason.into());
    }

    /// Loaded executor, refreshing its access time
    pub fn instance(&self, id: &str) -> Option<Arc<Executor>> {
        let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        instances.get(id).map(|entry| {
            entry.last_accessed.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&entry.executor)
        })
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Ids with a resident backend, sorted
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Make an executor visible to all future lookups
    pub fn publish(&self, id: &str, executor: Arc<Executor>) {
        let entry = LoadedEntry {
            executor,
            last_accessed: AtomicU64::new(self.tick()),
        };
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), entry);
    }

    /// Drop least-recently-used executors until at most `max_loaded`
    /// remain, never evicting `keep`. Returns the evicted ids.
    pub fn evict_lru(&self, max_loaded: usize, keep: &str) -> Vec<String> {
        let mut evicted = Vec::new();
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);

        while instances.len() > max_loaded {
            let lru = instances
                .iter()
                .filter(|(id, _)| id.as_str() != keep)
                .min_by_key(|(_, entry)| entry.last_accessed.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());

            match lru {
                Some(id) => {
                    instances.remove(&id);
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }

    /// Per-model load lock
    pub(crate) fn load_lock(&self, id: &str) -> Option<Arc<Mutex<()>>> {
        self.load_locks.get(id).cloned()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::engine::backend::{Backend, BackendFactory, BackendSpec};

    fn entry(id: &str, kind: &str, path: Option<&str>) -> ModelEntry {
        ModelEntry {
            id: Some(id.to_string()),
            model_type: Some(kind.to_string()),
            path: path.map(PathBuf::from),
            ..Default::default()
        }
    }

    fn registry(models: Vec<ModelEntry>, base: &Path) -> ModelRegistry {
        let manifest = ModelManifest::new(ParamDefaults::default(), models);
        ModelRegistry::build(&manifest, base, &BackendFactories::builtin())
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = registry(vec![entry("qwen3-0.6b", "echo", None)], Path::new("/"));
        let descriptor = registry.resolve("Qwen3-0.6B").unwrap();
        assert_eq!(descriptor.id, "qwen3-0.6b");
    }

    #[test]
    fn test_unknown_model_lists_known_ids() {
        let registry = registry(
            vec![entry("qwen3-0.6b", "echo", None), entry("phi-3", "echo", None)],
            Path::new("/"),
        );
        match registry.resolve("nonexistent-model") {
            Err(GatewayError::NotFound {
                requested,
                available,
            }) => {
                assert_eq!(requested, "nonexistent-model");
                assert_eq!(available, vec!["qwen3-0.6b", "phi-3"]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_skips_entries_without_id_and_duplicates() {
        let mut anonymous = entry("x", "echo", None);
        anonymous.id = None;
        let registry = registry(
            vec![
                anonymous,
                entry("a", "echo", None),
                entry("A", "echo", None),
            ],
            Path::new("/"),
        );
        assert_eq!(registry.list_ids(), vec!["a"]);
    }

    #[test]
    fn test_unknown_kind_recorded_as_failure() {
        let registry = registry(vec![entry("mystery", "tensorflow", None)], Path::new("/"));
        assert!(registry.is_failed("mystery"));
        assert!(registry
            .failure_reason("mystery")
            .unwrap()
            .contains("Unknown model_type 'tensorflow'"));
    }

    #[test]
    fn test_missing_file_recorded_at_build() {
        struct FileBacked;
        impl BackendFactory for FileBacked {
            fn construct(&self, _spec: &BackendSpec) -> anyhow::Result<Box<dyn Backend>> {
                anyhow::bail!("not used")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.gguf"), b"GGUF").unwrap();

        let mut factories = BackendFactories::new();
        factories.register("local_gguf", Arc::new(FileBacked));
        let manifest = ModelManifest::new(
            ParamDefaults::default(),
            vec![
                entry("present", "local_gguf", Some("present.gguf")),
                entry("absent", "local_gguf", Some("absent.gguf")),
            ],
        );
        let registry = ModelRegistry::build(&manifest, dir.path(), &factories);

        assert!(!registry.is_failed("present"));
        assert_eq!(
            registry.descriptor("present").unwrap().file_path,
            Some(dir.path().join("present.gguf"))
        );
        let reason = registry.failure_reason("absent").unwrap();
        assert!(reason.contains("absent.gguf"));
        assert!(reason.contains("not found"));
    }

    #[test]
    fn test_params_split_and_default_file_merged_below_inline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("defaults.json"),
            r#"{"n_ctx": 1024, "top_k": 10, "temperature": 0.9}"#,
        )
        .unwrap();

        let mut model = entry("m", "echo", None);
        model.default_params_file = Some(PathBuf::from("defaults.json"));
        model.params = json!({"temperature": 0.3, "n_batch": 64})
            .as_object()
            .cloned()
            .unwrap();

        let mut manifest = ModelManifest::new(ParamDefaults::default(), vec![model]);
        manifest.base_dir = Some(dir.path().to_path_buf());
        let registry = ModelRegistry::build(&manifest, Path::new("/"), &BackendFactories::builtin());

        let d = registry.descriptor("m").unwrap();
        assert_eq!(d.constructor_params["n_ctx"], 1024);
        assert_eq!(d.constructor_params["n_batch"], 64);
        assert_eq!(d.generation_defaults["top_k"], 10);
        assert_eq!(d.generation_defaults["temperature"], 0.3);
        assert!(!registry.is_failed("m"));
    }

    #[test]
    fn test_unreadable_default_params_file_is_failure() {
        let mut model = entry("m", "echo", None);
        model.default_params_file = Some(PathBuf::from("/definitely/not/here.json"));
        let registry = registry(vec![model], Path::new("/"));
        assert!(registry.is_failed("m"));
    }

    #[test]
    fn test_failure_is_write_once() {
        let registry = registry(vec![entry("m", "echo", None)], Path::new("/"));
        registry.record_failure("m", "first");
        registry.record_failure("m", "second");
        assert_eq!(registry.failure_reason("m").as_deref(), Some("first"));
    }

    #[test]
    fn test_load_locks_exist_for_every_id() {
        let registry = registry(
            vec![entry("a", "echo", None), entry("b", "nope", None)],
            Path::new("/"),
        );
        assert!(registry.load_lock("a").is_some());
        assert!(registry.load_lock("b").is_some());
        assert!(registry.load_lock("c").is_none());
    }
}
