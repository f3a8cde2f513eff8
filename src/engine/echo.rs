//! Echo backend
//!
//! Replies with the last user message. Needs no model file, which makes it
//! handy for development manifests and smoke tests of a deployment.

use anyhow::Result;

use super::backend::{Backend, BackendFactory, BackendSpec, ChunkIter};
use crate::config::ParamMap;
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatMessage};

pub struct EchoFactory;

impl BackendFactory for EchoFactory {
    fn requires_model_file(&self) -> bool {
        false
    }

    fn construct(&self, spec: &BackendSpec) -> Result<Box<dyn Backend>> {
        let prefix = spec
            .constructor_params
            .get("reply_prefix")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Box::new(EchoBackend {
            model_id: spec.model_id.clone(),
            prefix,
        }))
    }
}

pub struct EchoBackend {
    model_id: String,
    prefix: String,
}

impl EchoBackend {
    /// Words of the reply, truncated to `max_tokens` words.
    /// Returns the words and the finish reason.
    fn reply_words(&self, messages: &[ChatMessage], params: &ParamMap) -> (Vec<String>, &'static str) {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let text = format!("{}{}", self.prefix, last_user);
        let mut words: Vec<String> = text.split_whitespace().map(str::to_string).collect();

        let limit = params
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);
        match limit {
            Some(n) if words.len() > n => {
                words.truncate(n);
                (words, "length")
            }
            _ => (words, "stop"),
        }
    }
}

impl Backend for EchoBackend {
    fn create_chat_completion(
        &self,
        messages: &[ChatMessage],
        params: &ParamMap,
    ) -> Result<ChatCompletion> {
        let (words, finish_reason) = self.reply_words(messages, params);
        Ok(ChatCompletion::new(
            &self.model_id,
            ChatMessage::assistant(words.join(" ")),
            finish_reason,
        ))
    }

    fn create_chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        params: &ParamMap,
    ) -> Result<ChunkIter> {
        let (words, finish_reason) = self.reply_words(messages, params);
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let model = self.model_id.clone();

        let mut chunks = vec![ChatCompletionChunk::role(&id, &model)];
        for (i, word) in words.iter().enumerate() {
            let text = if i == 0 {
                word.clone()
            } else {
                format!(" {}", word)
            };
            chunks.push(ChatCompletionChunk::content(&id, &model, &text));
        }
        chunks.push(ChatCompletionChunk::finished(&id, &model, finish_reason));

        Ok(Box::new(chunks.into_iter().map(Ok)))
    }
}
