//! Per-environment model manifest
//!
//! A manifest lists the models the gateway may serve. It lives next to the
//! other configuration as `model_config_<environment>.{json,yaml,yml}` and
//! comes in two shapes: a bare list of model entries, or an object with
//! global `defaults` and a `models` list.
//!
//! ```yaml
//! defaults:
//!   constructor:
//!     n_ctx: 4096
//!   generation:
//!     temperature: 0.7
//! models:
//!   - id: qwen3-0.6b
//!     model_type: local_gguf
//!     path: qwen3-0.6b-q8_0.gguf
//!     system_prompt: You are a helpful assistant.
//!     params:
//!       max_tokens: 1024
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::generation::{ParamDefaults, ParamMap};

/// One model entry as written in the manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model id; entries without one are skipped
    #[serde(default)]
    pub id: Option<String>,

    /// Backend kind, e.g. `local_gguf` or `echo`
    #[serde(default, alias = "backend_kind")]
    pub model_type: Option<String>,

    /// Model file, relative to the model base path unless absolute
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Model-specific parameters (constructor and generation keys mixed)
    #[serde(default)]
    pub params: ParamMap,

    /// Chat format passed to the constructor; backend auto-detects when unset
    #[serde(default)]
    pub chat_format: Option<String>,

    /// Default system prompt injected when a conversation has none
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Optional JSON/YAML file of default params, merged below `params`
    #[serde(default)]
    pub default_params_file: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<ModelEntry>),
    Full {
        #[serde(default)]
        defaults: ParamDefaults,
        #[serde(default)]
        models: Vec<ModelEntry>,
    },
}

/// Parsed model manifest
#[derive(Debug, Clone, Default)]
pub struct ModelManifest {
    pub defaults: ParamDefaults,
    pub models: Vec<ModelEntry>,
    /// Directory the manifest was read from; relative `default_params_file`
    /// paths resolve against it
    pub base_dir: Option<PathBuf>,
}

impl From<ManifestFile> for ModelManifest {
    fn from(file: ManifestFile) -> Self {
        match file {
            ManifestFile::List(models) => Self {
                models,
                ..Default::default()
            },
            ManifestFile::Full { defaults, models } => Self {
                defaults,
                models,
                base_dir: None,
            },
        }
    }
}

impl ModelManifest {
    pub fn new(defaults: ParamDefaults, models: Vec<ModelEntry>) -> Self {
        Self {
            defaults,
            models,
            base_dir: None,
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ManifestFile = serde_yaml::from_str(content)?;
        Ok(file.into())
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: ManifestFile = serde_json::from_str(content)?;
        Ok(file.into())
    }

    /// Load a manifest file, picking the parser from its extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;

        let mut manifest = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(anyhow!("unsupported manifest extension: {:?}", other)),
        }
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;

        manifest.base_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Find `model_config_<env>.*` in a directory
    pub fn locate(dir: &Path, environment: &str) -> Option<PathBuf> {
        let pattern = dir.join(format!("model_config_{}.*", environment));
        glob::glob(pattern.to_str()?)
            .ok()?
            .filter_map(|r| r.ok())
            .find(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("json") | Some("yaml") | Some("yml")
                )
            })
    }

    /// Load the manifest for an environment.
    ///
    /// A missing manifest is not an error: the gateway starts with no models.
    pub fn load_for_environment(dir: &Path, environment: &str) -> Result<Self> {
        match Self::locate(dir, environment) {
            Some(path) => {
                tracing::info!(
                    "Running in '{}' mode. Loading models from '{}'...",
                    environment,
                    path.display()
                );
                let manifest = Self::from_path(&path)?;
                tracing::info!("Found {} model(s) in configuration.", manifest.models.len());
                Ok(manifest)
            }
            None => {
                tracing::warn!(
                    "model_config_{}.{{json,yaml}} not found in {}. No models loaded.",
                    environment,
                    dir.display()
                );
                Ok(Self::default())
            }
        }
    }
}

/// Read a default-params file (JSON or YAML map)
pub fn read_params_file(path: &Path) -> Result<ParamMap> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read params file {}", path.display()))?;
    let params = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    Ok(params)
}
