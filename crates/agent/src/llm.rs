//! LLM provider seam.
//!
//! The runtime talks to a [`LlmClient`]; the production implementation
//! speaks the OpenAI-compatible `chat/completions` JSON shape that all
//! three configured providers expose. Provider calls are the only
//! unbounded-latency suspension point in the system, so the client owns a
//! per-request timeout and classifies failures as transient or not.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use funnelbot_core::config::LlmConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolInvocation>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// A tool the model may call, in JSON-schema form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model. Arguments are parsed into a JSON
/// value here; typed decoding happens in [`crate::tools`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Clone, Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned status {status}")]
    Status { status: u16, body: String },
    #[error("provider transport failure: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Timeouts, throttling and server-side failures are worth retrying;
    /// anything that indicates a malformed request is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError>;
}

#[async_trait]
impl<T> LlmClient for std::sync::Arc<T>
where
    T: LlmClient + ?Sized,
{
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        (**self).chat(request).await
    }
}

/// OpenAI-compatible HTTP client.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_owned());

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.as_ref().map(|key| key.expose_secret().to_owned()),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let body = WireRequest::from(request);
        let mut http_request =
            self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status: status.as_u16(), body });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response carried no choices".to_owned()))?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = serde_json::from_str(&call.function.arguments).map_err(|err| {
                ProviderError::Malformed(format!(
                    "tool call `{}` arguments are not valid json: {err}",
                    call.function.name
                ))
            })?;
            tool_calls.push(ToolInvocation { id: call.id, name: call.function.name, arguments });
        }

        Ok(ChatCompletion { content: choice.message.content, tool_calls })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(error.to_string())
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    temperature: f32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

impl From<&ChatRequest> for WireRequest {
    fn from(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            temperature: request.temperature,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request.tools.iter().map(WireTool::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            },
            content: message.content.clone(),
            tool_call_id: message.tool_call_id.clone(),
            tool_calls: message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function",
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction,
}

#[derive(Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireToolFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireResponseToolCall>>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    id: String,
    function: WireResponseFunction,
}

#[derive(Deserialize)]
struct WireResponseFunction {
    name: String,
    arguments: String,
}

/// Deterministic client for tests: pops pre-scripted outcomes in order.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ChatCompletion, ProviderError>>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<ChatCompletion, ProviderError>>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()) }
    }

    pub fn replying(content: &str) -> Self {
        Self::new(vec![Ok(ChatCompletion {
            content: Some(content.to_owned()),
            tool_calls: Vec::new(),
        })])
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, _request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| ProviderError::Transport("scripted client lock poisoned".to_owned()))?;
        queue.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Malformed("scripted client ran out of responses".to_owned()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderError, ScriptedLlmClient};

    #[test]
    fn transient_classification_matches_retry_policy() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Transport("reset".to_owned()).is_transient());
        assert!(ProviderError::Status { status: 429, body: String::new() }.is_transient());
        assert!(ProviderError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!ProviderError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!ProviderError::Malformed("bad json".to_owned()).is_transient());
    }

    #[tokio::test]
    async fn scripted_client_pops_in_order_then_fails() {
        use super::{ChatCompletion, ChatRequest, LlmClient};

        let client = ScriptedLlmClient::new(vec![Ok(ChatCompletion {
            content: Some("hi".to_owned()),
            tool_calls: Vec::new(),
        })]);
        let request = ChatRequest {
            model: "test".to_owned(),
            temperature: 0.0,
            messages: Vec::new(),
            tools: Vec::new(),
        };

        let first = client.chat(&request).await.expect("first scripted reply");
        assert_eq!(first.content.as_deref(), Some("hi"));
        assert!(client.chat(&request).await.is_err());
    }
}
