//! Agent runtime: bounded tool loop around the provider seam.
//!
//! The provider call is retried with backoff on transient failures only,
//! and nothing is held locked across it; whatever a tool writes is
//! committed by the executor in its own transaction before the next
//! provider round starts.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{ChatMessage, ChatRequest, ChatCompletion, LlmClient, ProviderError, ToolSpec};
use crate::tools::{ToolCall, ToolError, ToolExecutor};

const RETRY_BASE_DELAY_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("agent exhausted {0} tool rounds without a final answer")]
    ToolRoundsExhausted(u32),
}

/// One executed tool call, kept for persistence alongside the assistant
/// turn.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolTraceEntry {
    pub tool: String,
    pub arguments: Value,
    pub outcome: Value,
}

#[derive(Clone, Debug)]
pub struct AgentReply {
    pub content: String,
    pub tool_trace: Vec<ToolTraceEntry>,
}

/// Everything the caller resolved before invoking the agent: prompt,
/// history, provider parameters, and the tool inventory for the persona.
#[derive(Clone, Debug)]
pub struct AgentInvocation {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub user_message: String,
    pub model: String,
    pub temperature: f32,
    pub tools: Vec<ToolSpec>,
}

pub struct AgentRuntime<C> {
    llm: C,
    max_retries: u32,
    max_tool_rounds: u32,
}

impl<C> AgentRuntime<C>
where
    C: LlmClient,
{
    pub fn new(llm: C, max_retries: u32, max_tool_rounds: u32) -> Self {
        Self { llm, max_retries, max_tool_rounds: max_tool_rounds.max(1) }
    }

    pub async fn respond(
        &self,
        invocation: AgentInvocation,
        executor: &dyn ToolExecutor,
    ) -> Result<AgentReply, AgentError> {
        let mut messages = Vec::with_capacity(invocation.history.len() + 2);
        messages.push(ChatMessage::system(invocation.system_prompt));
        messages.extend(invocation.history);
        messages.push(ChatMessage::user(invocation.user_message));

        let mut trace = Vec::new();

        for _round in 0..self.max_tool_rounds {
            let request = ChatRequest {
                model: invocation.model.clone(),
                temperature: invocation.temperature,
                messages: messages.clone(),
                tools: invocation.tools.clone(),
            };
            let completion = self.chat_with_retry(&request).await?;

            if completion.tool_calls.is_empty() {
                return Ok(AgentReply {
                    content: completion.content.unwrap_or_default(),
                    tool_trace: trace,
                });
            }

            messages.push(ChatMessage {
                role: crate::llm::ChatRole::Assistant,
                content: completion.content.clone().unwrap_or_default(),
                tool_call_id: None,
                tool_calls: Some(completion.tool_calls.clone()),
            });

            for tool_invocation in &completion.tool_calls {
                let outcome = match ToolCall::parse(tool_invocation) {
                    Ok(call) => {
                        let tool_name = call.name();
                        match executor.execute(call).await {
                            Ok(value) => value,
                            Err(error) => {
                                tracing::warn!(
                                    tool = tool_name,
                                    error = %error,
                                    "tool execution failed"
                                );
                                tool_error_outcome(&error)
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            tool = %tool_invocation.name,
                            error = %error,
                            "tool call rejected"
                        );
                        tool_error_outcome(&error)
                    }
                };

                trace.push(ToolTraceEntry {
                    tool: tool_invocation.name.clone(),
                    arguments: tool_invocation.arguments.clone(),
                    outcome: outcome.clone(),
                });
                messages.push(ChatMessage::tool_result(
                    tool_invocation.id.clone(),
                    outcome.to_string(),
                ));
            }
        }

        Err(AgentError::ToolRoundsExhausted(self.max_tool_rounds))
    }

    async fn chat_with_retry(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match self.llm.chat(request).await {
                Ok(completion) => return Ok(completion),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay =
                        Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt.min(8)));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Errors are fed back to the model as a structured outcome instead of
/// aborting the loop; the model can recover or apologize.
fn tool_error_outcome(error: &ToolError) -> Value {
    json!({ "success": false, "error": error.to_string() })
}
