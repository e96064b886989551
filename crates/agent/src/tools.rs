//! Typed tool protocol between the model and the business layer.
//!
//! The model only names tools and supplies arguments; the executor is
//! constructed already bound to the request's tenant and conversation, so
//! a tool call can never address another tenant's data no matter what the
//! model sends.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{ToolInvocation, ToolSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentPersona {
    Sales,
    Admin,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    Unknown(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: &'static str, message: String },
    #[error("tool `{tool}` failed: {message}")]
    Execution { tool: &'static str, message: String },
    #[error("tool `{tool}` is disabled for this tenant")]
    Disabled { tool: &'static str },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolCall {
    GetPlans,
    GetPlanDetails { slug: String },
    UpdateUserInfo { name: Option<String>, email: Option<String>, phone: Option<String> },
    GetConversationHistory { limit: Option<u32> },
    UpdateConversationStatus { status: Option<String>, funnel_stage: Option<String> },
    UpdateContextSummary { summary: String },
    CreateLead {
        stage: Option<String>,
        score: Option<i32>,
        preferred_plan_slug: Option<String>,
        objections: Option<Vec<String>>,
        next_action: Option<String>,
    },
    RequestHandoff { reason: String, summary: String },
    GetFunnelMetrics { start_date: Option<String>, end_date: Option<String> },
    GetConversationsByStage { stage: String },
    GetCommonObjections,
    GetPlanPerformance,
    GetRecentLeads { limit: Option<u32> },
}

#[derive(Deserialize)]
struct GetPlanDetailsArgs {
    slug: String,
}

#[derive(Deserialize)]
struct UpdateUserInfoArgs {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Deserialize)]
struct GetConversationHistoryArgs {
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct UpdateConversationStatusArgs {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    funnel_stage: Option<String>,
}

#[derive(Deserialize)]
struct UpdateContextSummaryArgs {
    summary: String,
}

#[derive(Deserialize)]
struct CreateLeadArgs {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    score: Option<i32>,
    #[serde(default)]
    preferred_plan_slug: Option<String>,
    #[serde(default)]
    objections: Option<Vec<String>>,
    #[serde(default)]
    next_action: Option<String>,
}

#[derive(Deserialize)]
struct RequestHandoffArgs {
    reason: String,
    summary: String,
}

#[derive(Deserialize)]
struct GetFunnelMetricsArgs {
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

#[derive(Deserialize)]
struct GetConversationsByStageArgs {
    stage: String,
}

#[derive(Deserialize)]
struct GetRecentLeadsArgs {
    #[serde(default)]
    limit: Option<u32>,
}

impl ToolCall {
    pub fn parse(invocation: &ToolInvocation) -> Result<Self, ToolError> {
        fn args<T: serde::de::DeserializeOwned>(
            tool: &'static str,
            arguments: &Value,
        ) -> Result<T, ToolError> {
            serde_json::from_value(arguments.clone())
                .map_err(|err| ToolError::InvalidArguments { tool, message: err.to_string() })
        }

        match invocation.name.as_str() {
            "get_plans" => Ok(Self::GetPlans),
            "get_plan_details" => {
                let parsed: GetPlanDetailsArgs = args("get_plan_details", &invocation.arguments)?;
                Ok(Self::GetPlanDetails { slug: parsed.slug })
            }
            "update_user_info" => {
                let parsed: UpdateUserInfoArgs = args("update_user_info", &invocation.arguments)?;
                Ok(Self::UpdateUserInfo {
                    name: parsed.name,
                    email: parsed.email,
                    phone: parsed.phone,
                })
            }
            "get_conversation_history" => {
                let parsed: GetConversationHistoryArgs =
                    args("get_conversation_history", &invocation.arguments)?;
                Ok(Self::GetConversationHistory { limit: parsed.limit })
            }
            "update_conversation_status" => {
                let parsed: UpdateConversationStatusArgs =
                    args("update_conversation_status", &invocation.arguments)?;
                Ok(Self::UpdateConversationStatus {
                    status: parsed.status,
                    funnel_stage: parsed.funnel_stage,
                })
            }
            "update_context_summary" => {
                let parsed: UpdateContextSummaryArgs =
                    args("update_context_summary", &invocation.arguments)?;
                Ok(Self::UpdateContextSummary { summary: parsed.summary })
            }
            "create_lead" => {
                let parsed: CreateLeadArgs = args("create_lead", &invocation.arguments)?;
                Ok(Self::CreateLead {
                    stage: parsed.stage,
                    score: parsed.score,
                    preferred_plan_slug: parsed.preferred_plan_slug,
                    objections: parsed.objections,
                    next_action: parsed.next_action,
                })
            }
            "request_handoff" => {
                let parsed: RequestHandoffArgs = args("request_handoff", &invocation.arguments)?;
                Ok(Self::RequestHandoff { reason: parsed.reason, summary: parsed.summary })
            }
            "get_funnel_metrics" => {
                let parsed: GetFunnelMetricsArgs =
                    args("get_funnel_metrics", &invocation.arguments)?;
                Ok(Self::GetFunnelMetrics {
                    start_date: parsed.start_date,
                    end_date: parsed.end_date,
                })
            }
            "get_conversations_by_stage" => {
                let parsed: GetConversationsByStageArgs =
                    args("get_conversations_by_stage", &invocation.arguments)?;
                Ok(Self::GetConversationsByStage { stage: parsed.stage })
            }
            "get_common_objections" => Ok(Self::GetCommonObjections),
            "get_plan_performance" => Ok(Self::GetPlanPerformance),
            "get_recent_leads" => {
                let parsed: GetRecentLeadsArgs = args("get_recent_leads", &invocation.arguments)?;
                Ok(Self::GetRecentLeads { limit: parsed.limit })
            }
            other => Err(ToolError::Unknown(other.to_owned())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetPlans => "get_plans",
            Self::GetPlanDetails { .. } => "get_plan_details",
            Self::UpdateUserInfo { .. } => "update_user_info",
            Self::GetConversationHistory { .. } => "get_conversation_history",
            Self::UpdateConversationStatus { .. } => "update_conversation_status",
            Self::UpdateContextSummary { .. } => "update_context_summary",
            Self::CreateLead { .. } => "create_lead",
            Self::RequestHandoff { .. } => "request_handoff",
            Self::GetFunnelMetrics { .. } => "get_funnel_metrics",
            Self::GetConversationsByStage { .. } => "get_conversations_by_stage",
            Self::GetCommonObjections => "get_common_objections",
            Self::GetPlanPerformance => "get_plan_performance",
            Self::GetRecentLeads { .. } => "get_recent_leads",
        }
    }
}

/// Executes tool calls against the business layer, pre-bound to one
/// tenant, conversation and user.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: ToolCall) -> Result<Value, ToolError>;
}

/// Tool specs offered to the model for a persona. `handoff_enabled`
/// follows the tenant's feature flags.
pub fn specs_for(persona: AgentPersona, handoff_enabled: bool) -> Vec<ToolSpec> {
    match persona {
        AgentPersona::Sales => {
            let mut specs = vec![
                spec(
                    "get_plans",
                    "List the active plans with prices and features.",
                    json!({"type": "object", "properties": {}, "required": []}),
                ),
                spec(
                    "get_plan_details",
                    "Get one plan by its slug.",
                    json!({
                        "type": "object",
                        "properties": {"slug": {"type": "string", "description": "Plan slug"}},
                        "required": ["slug"]
                    }),
                ),
                spec(
                    "update_user_info",
                    "Record the customer's name, email or phone when they share it.",
                    json!({
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "email": {"type": "string"},
                            "phone": {"type": "string"}
                        },
                        "required": []
                    }),
                ),
                spec(
                    "get_conversation_history",
                    "Fetch earlier turns of this conversation.",
                    json!({
                        "type": "object",
                        "properties": {"limit": {"type": "integer", "minimum": 1, "maximum": 100}},
                        "required": []
                    }),
                ),
                spec(
                    "update_conversation_status",
                    "Move the conversation forward in the sales funnel or change its status. \
                     Stages: awareness, interest, consideration, negotiation, closed_won, closed_lost.",
                    json!({
                        "type": "object",
                        "properties": {
                            "status": {"type": "string", "enum": ["active", "closed"]},
                            "funnel_stage": {"type": "string", "enum": [
                                "awareness", "interest", "consideration",
                                "negotiation", "closed_won", "closed_lost"
                            ]}
                        },
                        "required": []
                    }),
                ),
                spec(
                    "update_context_summary",
                    "Save a short summary of what matters in this conversation so far.",
                    json!({
                        "type": "object",
                        "properties": {"summary": {"type": "string"}},
                        "required": ["summary"]
                    }),
                ),
                spec(
                    "create_lead",
                    "Create or update the sales lead for this conversation.",
                    json!({
                        "type": "object",
                        "properties": {
                            "stage": {"type": "string", "enum": ["cold", "warm", "hot", "qualified"]},
                            "score": {"type": "integer", "minimum": 0, "maximum": 100},
                            "preferred_plan_slug": {"type": "string"},
                            "objections": {"type": "array", "items": {"type": "string"}},
                            "next_action": {"type": "string"}
                        },
                        "required": []
                    }),
                ),
            ];
            if handoff_enabled {
                specs.push(spec(
                    "request_handoff",
                    "Escalate this conversation to a human agent. Use when the customer is \
                     ready to close or needs help the assistant cannot give. After this call \
                     the conversation is locked for humans.",
                    json!({
                        "type": "object",
                        "properties": {
                            "reason": {"type": "string"},
                            "summary": {"type": "string"}
                        },
                        "required": ["reason", "summary"]
                    }),
                ));
            }
            specs
        }
        AgentPersona::Admin => vec![
            spec(
                "get_funnel_metrics",
                "Funnel stage counts and conversion rates for a date range.",
                json!({
                    "type": "object",
                    "properties": {
                        "start_date": {"type": "string", "description": "YYYY-MM-DD"},
                        "end_date": {"type": "string", "description": "YYYY-MM-DD"}
                    },
                    "required": []
                }),
            ),
            spec(
                "get_conversations_by_stage",
                "List conversations currently at a funnel stage.",
                json!({
                    "type": "object",
                    "properties": {"stage": {"type": "string"}},
                    "required": ["stage"]
                }),
            ),
            spec(
                "get_common_objections",
                "Most frequent objections recorded on leads.",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
            spec(
                "get_plan_performance",
                "Interest and conversion counts per plan.",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
            spec(
                "get_recent_leads",
                "Most recent leads with stage, score and contact details.",
                json!({
                    "type": "object",
                    "properties": {"limit": {"type": "integer", "minimum": 1, "maximum": 50}},
                    "required": []
                }),
            ),
        ],
    }
}

fn spec(name: &str, description: &str, parameters: Value) -> ToolSpec {
    ToolSpec { name: name.to_owned(), description: description.to_owned(), parameters }
}
