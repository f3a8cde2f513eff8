//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::http::{header, Request};
use serde_json::Value;

use lite_gateway::config::{ModelEntry, ModelManifest, ParamDefaults, ParamMap};
use lite_gateway::engine::{Backend, BackendFactory, BackendSpec, ChunkIter};
use lite_gateway::types::{ChatCompletion, ChatCompletionChunk, ChatMessage};
use lite_gateway::{Gateway, GatewayBuilder, GatewayConfig};

pub const TOKEN: &str = "test-token";

/// Replies with a fixed text; streams it word by word
pub struct Fixed {
    reply: String,
    fail_stream_after: Option<usize>,
}

impl Backend for Fixed {
    fn create_chat_completion(&self, _: &[ChatMessage], _: &ParamMap) -> Result<ChatCompletion> {
        Ok(ChatCompletion::new(
            "fixed",
            ChatMessage::assistant(self.reply.clone()),
            "stop",
        ))
    }

    fn create_chat_completion_stream(&self, _: &[ChatMessage], _: &ParamMap) -> Result<ChunkIter> {
        let words: Vec<String> = self
            .reply
            .split(' ')
            .enumerate()
            .map(|(i, w)| if i == 0 { w.to_string() } else { format!(" {}", w) })
            .collect();
        let fail_after = self.fail_stream_after;
        Ok(Box::new(words.into_iter().enumerate().map(move |(i, w)| {
            if Some(i) == fail_after {
                Err(anyhow!("engine exploded"))
            } else {
                Ok(ChatCompletionChunk::content("chatcmpl-test", "fixed", &w))
            }
        })))
    }
}

/// Builds [`Fixed`] backends and counts constructions
pub struct FixedFactory {
    pub reply: String,
    pub needs_file: bool,
    pub fail_stream_after: Option<usize>,
    pub construct_delay: Duration,
    pub constructions: AtomicUsize,
}

impl FixedFactory {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            needs_file: false,
            fail_stream_after: None,
            construct_delay: Duration::ZERO,
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

impl BackendFactory for FixedFactory {
    fn requires_model_file(&self) -> bool {
        self.needs_file
    }

    fn construct(&self, _spec: &BackendSpec) -> Result<Box<dyn Backend>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.construct_delay);
        Ok(Box::new(Fixed {
            reply: self.reply.clone(),
            fail_stream_after: self.fail_stream_after,
        }))
    }
}

/// Fails every construction
pub struct BrokenFactory;

impl BackendFactory for BrokenFactory {
    fn requires_model_file(&self) -> bool {
        false
    }

    fn construct(&self, _spec: &BackendSpec) -> Result<Box<dyn Backend>> {
        Err(anyhow!("weights are corrupt"))
    }
}

pub fn entry(id: &str, kind: &str, path: Option<&str>) -> ModelEntry {
    ModelEntry {
        id: Some(id.to_string()),
        model_type: Some(kind.to_string()),
        path: path.map(Into::into),
        ..Default::default()
    }
}

pub fn manifest(models: Vec<ModelEntry>) -> ModelManifest {
    ModelManifest::new(ParamDefaults::default(), models)
}

pub fn config(capacity: i64) -> GatewayConfig {
    GatewayConfig {
        default_model_id: "qwen3-0.6b".to_string(),
        auth_token: TOKEN.to_string(),
        max_concurrent_requests: capacity,
        slot_timeout_secs: 1,
        model_base_path: "/nonexistent/models".into(),
        ..Default::default()
    }
}

/// Gateway with a `fixed` kind (`qwen3-0.6b`, `phi-3`), a `broken` kind,
/// and a file-backed `local_gguf` model whose file is missing
pub async fn gateway(capacity: i64, factory: Arc<FixedFactory>) -> Gateway {
    let mut file_backed = FixedFactory::new("never");
    file_backed.needs_file = true;

    GatewayBuilder::new(config(capacity))
        .with_manifest(manifest(vec![
            entry("qwen3-0.6b", "fixed", None),
            entry("phi-3", "fixed", None),
            entry("corrupt", "broken", None),
            entry("missing-file", "local_gguf", Some("gone.gguf")),
        ]))
        .with_factory("fixed", factory)
        .with_factory("broken", Arc::new(BrokenFactory))
        .with_factory("local_gguf", Arc::new(file_backed))
        .build()
        .await
        .unwrap()
}

pub fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `data:` payloads of an SSE body, in order
pub async fn sse_data(response: axum::response::Response) -> Vec<String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .collect()
}
