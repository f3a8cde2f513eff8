//! Core request pipeline
//!
//! This module provides the admission and generation pipeline:
//! - Registry: configured models, loaded executors and load failures
//! - Scheduler: loads backends on demand, once per model
//! - Broker: global processing-slot pool
//! - Session: conversation history in the shared store
//! - Orchestrator: composes the above for one chat completion
//! - Executor: runs a backend off the async worker threads

mod backend;
mod broker;
mod echo;
mod executor;
mod orchestrator;
mod registry;
mod scheduler;
mod session;

pub use backend::{Backend, BackendFactories, BackendFactory, BackendSpec, ChunkIter};
pub use broker::{SlotBroker, SlotTicket};
pub use echo::{EchoBackend, EchoFactory};
pub use executor::Executor;
pub use orchestrator::{build_prompt, CompletionOrchestrator};
pub use registry::{ModelDescriptor, ModelRegistry};
pub use scheduler::{LoadError, Scheduler};
pub use session::SessionStore;
