//! Inference executor
//!
//! Wraps a constructed backend together with its generation defaults and
//! runs generation off the async worker threads.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_stream::stream;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use super::backend::Backend;
use crate::config::{request_params, ParamMap};
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatMessage};

/// Chunks buffered between the blocking producer and the async consumer
const STREAM_BUFFER: usize = 32;

/// Inference executor
///
/// Shared read-only by every request for its model.
pub struct Executor {
    /// Canonical model id
    model_id: String,
    /// The loaded backend
    backend: Arc<dyn Backend>,
    /// Generation defaults applied below client parameters
    generation_defaults: ParamMap,
}

impl Executor {
    /// Create a new executor
    pub fn new(
        model_id: impl Into<String>,
        backend: Box<dyn Backend>,
        generation_defaults: ParamMap,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            backend: Arc::from(backend),
            generation_defaults,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn generation_defaults(&self) -> &ParamMap {
        &self.generation_defaults
    }

    /// Generate a full completion on the blocking pool
    pub async fn generate_text(
        &self,
        messages: Vec<ChatMessage>,
        overrides: &ParamMap,
    ) -> Result<ChatCompletion> {
        let params = request_params(&self.generation_defaults, overrides);
        tracing::debug!(
            "Creating chat completion for '{}' with parameters: {:?}",
            self.model_id,
            params
        );

        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.create_chat_completion(&messages, &params))
            .await
            .map_err(|e| anyhow!("generation task failed: {}", e))?
    }

    /// Generate a streamed completion
    ///
    /// Nothing runs until the stream is first polled. The backend iterator
    /// is driven on the blocking pool; dropping the stream stops it at its
    /// next chunk.
    ///
    /// `lease` is held by the producer thread for as long as the backend is
    /// generating. It comes back on the returned receiver once the iterator
    /// has been dropped; if nobody is listening any more it is dropped there.
    pub fn generate<L: Send + 'static>(
        &self,
        messages: Vec<ChatMessage>,
        overrides: &ParamMap,
        lease: L,
    ) -> (
        impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static,
        oneshot::Receiver<L>,
    ) {
        let params = request_params(&self.generation_defaults, overrides);
        let backend = Arc::clone(&self.backend);
        let model_id = self.model_id.clone();
        let (lease_tx, lease_rx) = oneshot::channel();

        let chunks = stream! {
            tracing::debug!(
                "Creating streamed chat completion for '{}' with parameters: {:?}",
                model_id,
                params
            );

            let (tx, mut rx) = mpsc::channel::<Result<ChatCompletionChunk>>(STREAM_BUFFER);
            let producer = tokio::task::spawn_blocking(move || {
                drive_stream(backend.as_ref(), &messages, &params, &tx);
                if lease_tx.send(lease).is_err() {
                    tracing::debug!("Stream lease returned after its consumer went away");
                }
            });

            while let Some(item) = rx.recv().await {
                yield item;
            }

            // Channel closed without an error item: a panic inside the
            // backend shows up only on the join handle.
            if let Err(e) = producer.await {
                yield Err(anyhow!("generation task failed: {}", e));
            }
        };
        (chunks, lease_rx)
    }
}

/// Feed backend chunks into `tx` until the iterator ends, fails, or the
/// receiver is gone. The iterator is dropped before this returns.
fn drive_stream(
    backend: &dyn Backend,
    messages: &[ChatMessage],
    params: &ParamMap,
    tx: &mpsc::Sender<Result<ChatCompletionChunk>>,
) {
    let chunks = match backend.create_chat_completion_stream(messages, params) {
        Ok(chunks) => chunks,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };
    for chunk in chunks {
        let failed = chunk.is_err();
        if tx.blocking_send(chunk).is_err() {
            tracing::debug!("Stream consumer went away; stopping generation");
            return;
        }
        if failed {
            return;
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("model_id", &self.model_id)
            .field("generation_defaults", &self.generation_defaults)
            .finish()
    }
}
