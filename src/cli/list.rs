//! List models command

use std::path::PathBuf;

use anyhow::Result;

use crate::config::{GatewayConfig, ModelManifest};
use crate::engine::{BackendFactories, ModelDescriptor, ModelRegistry};

/// List configured models and whether they can load
pub async fn list(config: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = GatewayConfig::load(config.as_deref())?;

    let Some(path) = ModelManifest::locate(&config.model_config_dir, &config.environment) else {
        println!(
            "No model_config_{}.* found in {}",
            config.environment,
            config.model_config_dir.display()
        );
        println!("\nSet MODEL_CONFIG_DIR / ENVIRONMENT or create the manifest.");
        return Ok(());
    };

    let manifest = ModelManifest::from_path(&path)?;
    let registry = ModelRegistry::build(
        &manifest,
        &config.model_base_path,
        &BackendFactories::builtin(),
    );

    println!("Models in {}:\n", path.display());

    if registry.descriptors().is_empty() {
        println!("  No models configured.");
        return Ok(());
    }

    for descriptor in registry.descriptors() {
        let failure = registry.failure_reason(&descriptor.id);
        if verbose {
            print_model_details(descriptor, failure);
        } else {
            let status = if failure.is_some() { "unavailable" } else { "ok" };
            println!("  {} ({}, {})", descriptor.id, descriptor.backend_kind, status);
        }
    }

    Ok(())
}

fn print_model_details(descriptor: &ModelDescriptor, failure: Option<String>) {
    println!("  {}", descriptor.id);
    println!("    Type: {}", descriptor.backend_kind);
    if let Some(path) = &descriptor.file_path {
        println!("    Path: {}", path.display());
        if let Ok(metadata) = std::fs::metadata(path) {
            let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
            if size_mb > 1024.0 {
                println!("    Size: {:.2} GB", size_mb / 1024.0);
            } else {
                println!("    Size: {:.2} MB", size_mb);
            }
        }
    }
    if let Some(format) = &descriptor.chat_format {
        println!("    Chat format: {}", format);
    }
    if let Some(prompt) = &descriptor.system_prompt {
        println!("    System prompt: {}", prompt);
    }
    if !descriptor.constructor_params.is_empty() {
        println!(
            "    Constructor params: {}",
            serde_json::Value::Object(descriptor.constructor_params.clone())
        );
    }
    if !descriptor.generation_defaults.is_empty() {
        println!(
            "    Generation defaults: {}",
            serde_json::Value::Object(descriptor.generation_defaults.clone())
        );
    }
    match failure {
        Some(reason) => println!("    Status: unavailable ({})", reason),
        None => println!("    Status: ok"),
    }
    println!();
}
