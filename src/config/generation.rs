//! Backend parameter maps
//!
//! Models are configured with free-form parameter maps. At load time the
//! layers are merged and split into constructor parameters (consumed once
//! when the backend is built) and generation defaults (applied to every
//! request, below the client's own values).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form parameter map, as found in the manifest and in requests
pub type ParamMap = serde_json::Map<String, Value>;

/// Keys consumed by the backend constructor rather than by generation
pub const CONSTRUCTOR_KEYS: &[&str] = &["n_ctx", "n_batch", "verbose", "chat_format", "n_threads"];

/// Request keys that are part of the OpenAI API but never reach a backend
pub const UNSUPPORTED_GENERATION_KEYS: &[&str] = &["user"];

/// Global parameter defaults shared by every model in a manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamDefaults {
    /// Constructor defaults (lowest precedence)
    #[serde(default)]
    pub constructor: ParamMap,

    /// Generation defaults
    #[serde(default)]
    pub generation: ParamMap,
}

/// Merged parameters ready for construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendParams {
    pub constructor: ParamMap,
    pub generation: ParamMap,
}

impl BackendParams {
    /// Split a merged map by [`CONSTRUCTOR_KEYS`].
    ///
    /// `verbose` defaults to false unless a layer set it.
    pub fn split(merged: ParamMap) -> Self {
        let mut params = Self::default();
        for (key, value) in merged {
            if is_constructor_key(&key) {
                params.constructor.insert(key, value);
            } else {
                params.generation.insert(key, value);
            }
        }
        params
            .constructor
            .entry("verbose")
            .or_insert(Value::Bool(false));
        params
    }
}

pub fn is_constructor_key(key: &str) -> bool {
    CONSTRUCTOR_KEYS.contains(&key)
}

/// Merge layers left to right; later layers win.
pub fn merge_params<'a>(layers: impl IntoIterator<Item = &'a ParamMap>) -> ParamMap {
    let mut merged = ParamMap::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Request-time parameters: model defaults overridden by the client,
/// with unsupported keys removed.
pub fn request_params(defaults: &ParamMap, overrides: &ParamMap) -> ParamMap {
    let mut params = merge_params([defaults, overrides]);
    for key in UNSUPPORTED_GENERATION_KEYS {
        params.remove(*key);
    }
    params
}
