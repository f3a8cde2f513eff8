//! OpenAI-compatible request and response types
//!
//! Shared between the HTTP layer and the engine: backends produce
//! [`ChatCompletion`]s and [`ChatCompletionChunk`]s directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ParamMap;
use crate::error::GatewayError;

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Stop sequences may be sent as a single string or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

/// Chat completion request body
///
/// Unknown fields are ignored. Only the sampling fields the client actually
/// set are forwarded to the backend (see [`ChatCompletionRequest::generation_params`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub logit_bias: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub logprobs: Option<bool>,
    #[serde(default)]
    pub top_logprobs: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub response_format: Option<Value>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub stop: Option<StopSequences>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub user: Option<String>,
}

fn check_range(name: &str, value: Option<f32>, min: f32, max: f32) -> Result<(), GatewayError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(GatewayError::InvalidRequest(format!(
            "{name} must be between {min} and {max}, got {v}"
        ))),
        _ => Ok(()),
    }
}

impl ChatCompletionRequest {
    /// Reject out-of-range sampling values
    pub fn validate(&self) -> Result<(), GatewayError> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;

        if let Some(top) = self.top_logprobs {
            if top > 20 {
                return Err(GatewayError::InvalidRequest(format!(
                    "top_logprobs must be between 0 and 20, got {top}"
                )));
            }
        }
        if self.n == Some(0) {
            return Err(GatewayError::InvalidRequest(
                "n must be greater than or equal to 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sampling parameters explicitly set by the client.
    ///
    /// `model`, `messages`, `stream` and `session_id` are routing fields and
    /// never reach the backend.
    pub fn generation_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                params.insert(key.to_string(), v);
            }
        };

        put("frequency_penalty", self.frequency_penalty.map(Value::from));
        put("logit_bias", self.logit_bias.clone().map(Value::Object));
        put("logprobs", self.logprobs.map(Value::from));
        put("top_logprobs", self.top_logprobs.map(Value::from));
        put("max_tokens", self.max_tokens.map(Value::from));
        put("n", self.n.map(Value::from));
        put("presence_penalty", self.presence_penalty.map(Value::from));
        put("response_format", self.response_format.clone());
        put("seed", self.seed.map(Value::from));
        put(
            "stop",
            self.stop
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok()),
        );
        put("temperature", self.temperature.map(Value::from));
        put("top_p", self.top_p.map(Value::from));
        put("user", self.user.clone().map(Value::from));
        params
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Non-streaming chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Injected by the gateway before the response leaves the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatCompletion {
    /// Single-choice completion with a fresh id and timestamp
    pub fn new(model: impl Into<String>, message: ChatMessage, finish_reason: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage: None,
            session_id: None,
        }
    }

    /// The assistant message of the first choice, if any
    pub fn assistant_message(&self) -> Option<&ChatMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One incremental unit of a streamed completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    /// Present on the first chunk of a stream only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatCompletionChunk {
    fn with_choice(id: &str, model: &str, delta: ChunkDelta, finish_reason: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            session_id: None,
        }
    }

    /// Opening chunk announcing the assistant role
    pub fn role(id: &str, model: &str) -> Self {
        let delta = ChunkDelta {
            role: Some("assistant".to_string()),
            content: None,
        };
        Self::with_choice(id, model, delta, None)
    }

    pub fn content(id: &str, model: &str, text: &str) -> Self {
        let delta = ChunkDelta {
            role: None,
            content: Some(text.to_string()),
        };
        Self::with_choice(id, model, delta, None)
    }

    pub fn finished(id: &str, model: &str, finish_reason: &str) -> Self {
        Self::with_choice(id, model, ChunkDelta::default(), Some(finish_reason))
    }

    /// Concatenated content fragments carried by this chunk
    pub fn content_text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}

/// Error-shaped event emitted in place of further chunks when a stream fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorEvent {
    pub error: ErrorDetail,
    /// Set only when the stream failed before any chunk carried the session id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Item of a completion stream as handed to the SSE layer
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Chunk(ChatCompletionChunk),
    Error(StreamErrorEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ignores_unknown_fields() {
        let json = r#"{
            "messages": [{"role": "user", "content": "hi"}],
            "model": "Qwen3-0.6B",
            "some_vendor_field": {"nested": true}
        }"#;
        let request: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.model.as_deref(), Some("Qwen3-0.6B"));
        assert!(!request.stream);
        assert_eq!(request.messages, vec![ChatMessage::user("hi")]);
    }

    #[test]
    fn test_generation_params_only_set_fields() {
        let json = r#"{
            "messages": [],
            "session_id": "abc",
            "stream": true,
            "temperature": 0.2,
            "stop": "</s>",
            "max_tokens": 64
        }"#;
        let request: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        let params = request.generation_params();

        assert_eq!(params.len(), 3);
        assert_eq!(params["max_tokens"], 64);
        assert_eq!(params["stop"], "</s>");
        assert!((params["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(!params.contains_key("session_id"));
        assert!(!params.contains_key("stream"));
    }

    #[test]
    fn test_stop_accepts_list() {
        let json = r#"{"messages": [], "stop": ["a", "b"]}"#;
        let request: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request.stop,
            Some(StopSequences::Many(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(request.generation_params()["stop"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_validate_ranges() {
        let mut request = ChatCompletionRequest {
            temperature: Some(1.5),
            top_p: Some(0.9),
            ..Default::default()
        };
        assert!(request.validate().is_ok());

        request.temperature = Some(2.5);
        assert!(matches!(
            request.validate(),
            Err(GatewayError::InvalidRequest(_))
        ));

        request.temperature = None;
        request.frequency_penalty = Some(-3.0);
        assert!(request.validate().is_err());

        request.frequency_penalty = None;
        request.n = Some(0);
        assert!(request.validate().is_err());

        request.n = Some(1);
        request.top_logprobs = Some(21);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_chunk_session_id_skipped_when_absent() {
        let chunk = ChatCompletionChunk::content("id-1", "m", "hello");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("session_id"));
        assert_eq!(chunk.content_text(), "hello");

        let mut first = ChatCompletionChunk::role("id-1", "m");
        first.session_id = Some("s-1".to_string());
        let json = serde_json::to_string(&first).unwrap();
        assert!(json.contains(r#""session_id":"s-1""#));
        assert!(json.contains(r#""role":"assistant""#));
    }

    #[test]
    fn test_stream_event_is_untagged() {
        let event = StreamEvent::Error(StreamErrorEvent {
            error: ErrorDetail {
                message: "boom".to_string(),
                r#type: "server_error".to_string(),
            },
            session_id: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["error"]["message"], "boom");
        assert!(json.get("session_id").is_none());
    }
}
