pub mod llm;
pub mod runtime;
pub mod tools;

pub use llm::{
    ChatCompletion, ChatMessage, ChatRequest, ChatRole, HttpLlmClient, LlmClient, ProviderError,
    ScriptedLlmClient, ToolInvocation, ToolSpec,
};
pub use runtime::{AgentError, AgentInvocation, AgentReply, AgentRuntime, ToolTraceEntry};
pub use tools::{AgentPersona, ToolCall, ToolError, ToolExecutor};
