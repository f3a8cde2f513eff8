//! Completion orchestrator
//!
//! Answers one chat-completion request: resolve the model, make sure its
//! backend is loaded, rebuild the conversation from the session store, hold
//! a processing slot while generating, then persist the new turn.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::broker::{SlotBroker, SlotTicket};
use super::executor::Executor;
use super::registry::ModelRegistry;
use super::scheduler::{LoadError, Scheduler};
use super::session::SessionStore;
use crate::config::ParamMap;
use crate::error::{GatewayError, Result};
use crate::types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage, StreamErrorEvent,
    StreamEvent,
};

/// Stored history followed by the new messages, with the model's default
/// system prompt in front unless the conversation already opens with one.
pub fn build_prompt(
    history: Vec<ChatMessage>,
    messages: Vec<ChatMessage>,
    system_prompt: Option<&str>,
) -> Vec<ChatMessage> {
    let mut prompt = history;
    prompt.extend(messages);

    if let Some(system_prompt) = system_prompt.filter(|p| !p.is_empty()) {
        if !prompt.first().is_some_and(ChatMessage::is_system) {
            prompt.insert(0, ChatMessage::system(system_prompt));
        }
    }
    prompt
}

/// Everything resolved before a slot is requested
struct PreparedRequest {
    model_id: String,
    executor: Arc<Executor>,
    session_id: String,
    prompt: Vec<ChatMessage>,
    params: ParamMap,
}

pub struct CompletionOrchestrator {
    registry: Arc<ModelRegistry>,
    scheduler: Arc<Scheduler>,
    sessions: SessionStore,
    broker: Arc<SlotBroker>,
    default_model_id: String,
    persist_partial_streams: bool,
}

impl CompletionOrchestrator {
    pub fn new(
        scheduler: Arc<Scheduler>,
        sessions: SessionStore,
        broker: Arc<SlotBroker>,
        default_model_id: impl Into<String>,
    ) -> Self {
        Self {
            registry: Arc::clone(scheduler.registry()),
            scheduler,
            sessions,
            broker,
            default_model_id: default_model_id.into(),
            persist_partial_streams: false,
        }
    }

    /// Keep the partial assistant turn when a stream fails after content
    pub fn with_persist_partial_streams(mut self, persist: bool) -> Self {
        self.persist_partial_streams = persist;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<SlotBroker> {
        &self.broker
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn prepare(&self, request: ChatCompletionRequest) -> Result<PreparedRequest> {
        request.validate()?;

        let requested = request
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model_id);
        let descriptor = self.registry.resolve(requested)?;
        let model_id = descriptor.id.clone();

        if let Some(reason) = self.registry.failure_reason(&model_id) {
            return Err(GatewayError::ConfiguredLoadFailure { id: model_id, reason });
        }

        let executor = self
            .scheduler
            .get_backend(&model_id)
            .await
            .map_err(|e| match e {
                LoadError::Failed { id, reason } => {
                    GatewayError::ConfiguredLoadFailure { id, reason }
                }
                LoadError::Unconfigured(id) => GatewayError::InternalInconsistency(id),
            })?;

        let params = request.generation_params();
        let session_id = request
            .session_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(SessionStore::new_session_id);
        let history = self.sessions.load(&session_id).await;
        let prompt = build_prompt(history, request.messages, descriptor.system_prompt.as_deref());

        Ok(PreparedRequest {
            model_id,
            executor,
            session_id,
            prompt,
            params,
        })
    }

    /// Non-streaming completion with `session_id` set on the response.
    ///
    /// Generation and persistence run on a spawned task that owns the slot,
    /// so a caller that goes away does not free the slot while the backend
    /// is still busy.
    pub async fn complete(&self, request: ChatCompletionRequest) -> Result<ChatCompletion> {
        let prepared = self.prepare(request).await?;
        let ticket = self.broker.acquire(&prepared.model_id).await?;

        let sessions = self.sessions.clone();
        let work = tokio::spawn(async move {
            let result = generate_and_persist(prepared, &sessions).await;
            ticket.release().await;
            result
        });
        work.await.map_err(|e| {
            GatewayError::GenerationFailure(format!("generation task failed: {}", e))
        })?
    }

    /// Streamed completion.
    ///
    /// The slot is taken before this returns, so a busy pool surfaces as an
    /// error rather than inside the stream. From then on the slot travels
    /// with the generation work and is returned once the backend stops,
    /// whether the stream runs to the end or is dropped.
    pub async fn stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        let prepared = self.prepare(request).await?;
        let ticket = self.broker.acquire(&prepared.model_id).await?;

        Ok(stream_events(
            prepared,
            ticket,
            self.sessions.clone(),
            self.persist_partial_streams,
        ))
    }
}

async fn generate_and_persist(
    prepared: PreparedRequest,
    sessions: &SessionStore,
) -> Result<ChatCompletion> {
    let PreparedRequest {
        model_id,
        executor,
        session_id,
        mut prompt,
        params,
    } = prepared;

    let mut completion = executor
        .generate_text(prompt.clone(), &params)
        .await
        .map_err(|e| {
            tracing::error!("Error during model generation for model '{}': {:#}", model_id, e);
            GatewayError::GenerationFailure(format!("{:#}", e))
        })?;

    let reply = completion.assistant_message().cloned().ok_or_else(|| {
        GatewayError::GenerationFailure("model returned no choices".to_string())
    })?;

    prompt.push(reply);
    sessions.save(&session_id, &prompt).await;

    completion.session_id = Some(session_id);
    Ok(completion)
}

fn stream_events(
    prepared: PreparedRequest,
    ticket: SlotTicket,
    sessions: SessionStore,
    persist_partial: bool,
) -> BoxStream<'static, StreamEvent> {
    let PreparedRequest {
        model_id,
        executor,
        session_id,
        mut prompt,
        params,
    } = prepared;
    // The producer thread holds the ticket while the backend runs and hands
    // it back once the iterator is gone.
    let (chunks, returned_ticket) = executor.generate(prompt.clone(), &params, ticket);
    let mut chunks = Box::pin(chunks);

    stream! {
        let mut session_sent = false;
        let mut content = String::new();
        let mut failure = None;

        while let Some(item) = chunks.next().await {
            match item {
                Ok(mut chunk) => {
                    content.push_str(&chunk.content_text());
                    if !session_sent {
                        chunk.session_id = Some(session_id.clone());
                        session_sent = true;
                    }
                    yield StreamEvent::Chunk(chunk);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // The producer stops after an error; wait for it to finish.
        while chunks.next().await.is_some() {}
        drop(chunks);

        match &failure {
            None if !session_sent => {
                let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
                let mut terminal = ChatCompletionChunk::finished(&id, &model_id, "stop");
                terminal.session_id = Some(session_id.clone());
                yield StreamEvent::Chunk(terminal);
            }
            None => {}
            Some(e) => {
                tracing::error!("Error during model generation stream for '{}': {:#}", model_id, e);
            }
        }

        if (failure.is_none() || persist_partial) && !content.is_empty() {
            prompt.push(ChatMessage::assistant(content));
            sessions.save(&session_id, &prompt).await;
        }
        if let Ok(ticket) = returned_ticket.await {
            ticket.release().await;
        }

        if let Some(e) = failure {
            let error = GatewayError::GenerationFailure(format!("{:#}", e)).to_detail();
            yield StreamEvent::Error(StreamErrorEvent {
                error,
                session_id: (!session_sent).then_some(session_id),
            });
        }
    }
    .boxed()
}

impl std::fmt::Debug for CompletionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOrchestrator")
            .field("default_model_id", &self.default_model_id)
            .field("persist_partial_streams", &self.persist_partial_streams)
            .field("broker", &self.broker)
            .finish()
    }
}
