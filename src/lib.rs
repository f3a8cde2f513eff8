//! lite-gateway - OpenAI-compatible gateway for locally hosted LLM runtimes
//!
//! Accepts chat-completion requests, resolves the model that should serve
//! them, bounds concurrent generations across every gateway process sharing
//! a store, keeps multi-turn history per session, and streams or returns
//! the generated text.
//!
//! # Architecture
//!
//! - **engine**: model registry, on-demand loader, slot broker, session
//!   store and the orchestrator composing them
//! - **store**: the shared key/value store behind slots and sessions
//! - **server**: axum routes, bearer auth, SSE streaming
//!
//! Generation engines plug in through [`engine::BackendFactory`].
//!
//! # Example
//!
//! ```bash
//! # Start server
//! AUTH=s3cret lite-gateway serve --port 8000 --preload qwen3-0.6b
//!
//! # List configured models
//! lite-gateway list --verbose
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod server;
pub mod store;
pub mod types;

// Re-export key types
pub use config::{GatewayConfig, ModelManifest, ServerConfig};
pub use engine::{CompletionOrchestrator, Executor, ModelRegistry, Scheduler};
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayBuilder};
