//! Generation backends
//!
//! A backend is an in-memory model able to produce chat completions. The
//! gateway treats it as an opaque, blocking, CPU-heavy capability; the
//! [`Executor`](super::Executor) moves every call onto the blocking pool.
//!
//! Backends are built by a [`BackendFactory`] registered for a
//! `backend_kind` (the manifest's `model_type`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use super::echo::EchoFactory;
use crate::config::ParamMap;
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatMessage};

/// Single-pass sequence of streamed chunks
pub type ChunkIter = Box<dyn Iterator<Item = Result<ChatCompletionChunk>> + Send>;

/// A loaded model
pub trait Backend: Send + Sync {
    /// Generate a full completion
    fn create_chat_completion(
        &self,
        messages: &[ChatMessage],
        params: &ParamMap,
    ) -> Result<ChatCompletion>;

    /// Start a streamed completion. The iterator is consumed lazily and
    /// may fail part-way through.
    fn create_chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        params: &ParamMap,
    ) -> Result<ChunkIter>;
}

/// Everything a factory needs to construct one backend
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub model_id: String,
    pub backend_kind: String,
    /// Resolved model file, when the kind is file-backed
    pub model_path: Option<PathBuf>,
    /// Merged constructor parameters
    pub constructor_params: ParamMap,
}

/// Constructs backends of one kind
pub trait BackendFactory: Send + Sync {
    /// Whether descriptors of this kind must point at an existing file
    fn requires_model_file(&self) -> bool {
        true
    }

    /// Build a backend. Blocking; called on the blocking pool.
    fn construct(&self, spec: &BackendSpec) -> Result<Box<dyn Backend>>;
}

/// Factories by backend kind
#[derive(Clone, Default)]
pub struct BackendFactories {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl BackendFactories {
    /// Empty set; every configured model will be recorded as failed
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories shipped with the gateway
    pub fn builtin() -> Self {
        let mut factories = Self::new();
        factories.register("echo", Arc::new(EchoFactory));
        factories
    }

    /// Register (or replace) the factory for `kind`
    pub fn register(&mut self, kind: impl Into<String>, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn BackendFactory>> {
        self.factories.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for BackendFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactories")
            .field("kinds", &self.kinds())
            .finish()
    }
}
