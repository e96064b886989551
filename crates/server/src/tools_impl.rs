//! Tool execution over the scoped repositories.
//!
//! The executor is constructed per request, bound to the resolved tenant,
//! the current conversation and the current user. The model addresses
//! neither tenants nor conversation ids; anything it claims in arguments
//! beyond the declared fields is ignored. Each mutating tool commits in
//! its own repository transaction, so a retried tool call converges
//! instead of double-applying.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use funnelbot_agent::tools::{ToolCall, ToolError, ToolExecutor};
use funnelbot_core::domain::conversation::ConversationStatus;
use funnelbot_core::domain::lead::LeadStage;
use funnelbot_core::funnel::FunnelStage;
use funnelbot_db::repositories::{
    AnalyticsRepository, ConversationRepository, LeadRepository, LeadUpdate, MessageRepository,
    PlanRepository, RepositoryError, UserContactUpdate, UserRepository,
};
use funnelbot_db::DbPool;

pub struct ScopedToolExecutor {
    pool: DbPool,
    tenant_id: Uuid,
    conversation_id: Uuid,
    user_key: String,
    handoff_enabled: bool,
    analytics_enabled: bool,
}

impl ScopedToolExecutor {
    pub fn new(
        pool: DbPool,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_key: String,
        handoff_enabled: bool,
        analytics_enabled: bool,
    ) -> Self {
        Self { pool, tenant_id, conversation_id, user_key, handoff_enabled, analytics_enabled }
    }

    fn repo_error(tool: &'static str, error: RepositoryError) -> ToolError {
        ToolError::Execution { tool, message: error.to_string() }
    }

    fn require_analytics(&self, tool: &'static str) -> Result<(), ToolError> {
        if self.analytics_enabled {
            Ok(())
        } else {
            Err(ToolError::Disabled { tool })
        }
    }
}

#[async_trait]
impl ToolExecutor for ScopedToolExecutor {
    async fn execute(&self, call: ToolCall) -> Result<Value, ToolError> {
        match call {
            ToolCall::GetPlans => {
                let plans = PlanRepository::new(self.pool.clone())
                    .list_active(self.tenant_id)
                    .await
                    .map_err(|e| Self::repo_error("get_plans", e))?;
                Ok(json!({
                    "success": true,
                    "count": plans.len(),
                    "plans": plans.iter().map(plan_json).collect::<Vec<_>>(),
                }))
            }
            ToolCall::GetPlanDetails { slug } => {
                let plan = PlanRepository::new(self.pool.clone())
                    .find_by_slug(self.tenant_id, &slug)
                    .await
                    .map_err(|e| Self::repo_error("get_plan_details", e))?;
                Ok(match plan {
                    Some(plan) => json!({ "success": true, "plan": plan_json(&plan) }),
                    None => json!({ "success": false, "error": "Plan not found", "slug": slug }),
                })
            }
            ToolCall::UpdateUserInfo { name, email, phone } => {
                let user = UserRepository::new(self.pool.clone())
                    .update_contact(
                        self.tenant_id,
                        &self.user_key,
                        UserContactUpdate { name, email, phone },
                    )
                    .await
                    .map_err(|e| Self::repo_error("update_user_info", e))?;
                Ok(json!({
                    "success": true,
                    "user_key": user.user_key,
                    "name": user.name,
                    "email": user.email,
                    "phone": user.phone,
                }))
            }
            ToolCall::GetConversationHistory { limit } => {
                let messages = MessageRepository::new(self.pool.clone())
                    .recent(self.tenant_id, self.conversation_id, limit.unwrap_or(10))
                    .await
                    .map_err(|e| Self::repo_error("get_conversation_history", e))?;
                Ok(json!({
                    "success": true,
                    "message_count": messages.len(),
                    "messages": messages
                        .iter()
                        .map(|message| json!({
                            "role": message.role.as_str(),
                            "content": truncate(&message.content, 500),
                            "created_at": message.created_at.to_rfc3339(),
                        }))
                        .collect::<Vec<_>>(),
                }))
            }
            ToolCall::UpdateConversationStatus { status, funnel_stage } => {
                let status = status
                    .as_deref()
                    .map(str::parse::<ConversationStatus>)
                    .transpose()
                    .map_err(|e| ToolError::InvalidArguments {
                        tool: "update_conversation_status",
                        message: e.to_string(),
                    })?;
                let stage = funnel_stage
                    .as_deref()
                    .map(str::parse::<FunnelStage>)
                    .transpose()
                    .map_err(|e| ToolError::InvalidArguments {
                        tool: "update_conversation_status",
                        message: e.to_string(),
                    })?;

                let conversation = ConversationRepository::new(self.pool.clone())
                    .update_progress(self.tenant_id, self.conversation_id, status, stage)
                    .await
                    .map_err(|e| Self::repo_error("update_conversation_status", e))?;
                Ok(json!({
                    "success": true,
                    "status": conversation.status.as_str(),
                    "funnel_stage": conversation.funnel_stage.as_str(),
                }))
            }
            ToolCall::UpdateContextSummary { summary } => {
                ConversationRepository::new(self.pool.clone())
                    .set_context_summary(self.tenant_id, self.conversation_id, &summary)
                    .await
                    .map_err(|e| Self::repo_error("update_context_summary", e))?;
                Ok(json!({ "success": true }))
            }
            ToolCall::CreateLead { stage, score, preferred_plan_slug, objections, next_action } => {
                let stage = stage
                    .as_deref()
                    .map(str::parse::<LeadStage>)
                    .transpose()
                    .map_err(|e| ToolError::InvalidArguments {
                        tool: "create_lead",
                        message: e.to_string(),
                    })?;

                let preferred_plan_id = match preferred_plan_slug {
                    Some(slug) => {
                        let plan = PlanRepository::new(self.pool.clone())
                            .find_by_slug(self.tenant_id, &slug)
                            .await
                            .map_err(|e| Self::repo_error("create_lead", e))?;
                        match plan {
                            Some(plan) => Some(plan.id),
                            None => {
                                return Ok(json!({
                                    "success": false,
                                    "error": "Plan not found",
                                    "slug": slug,
                                }))
                            }
                        }
                    }
                    None => None,
                };

                let lead = LeadRepository::new(self.pool.clone())
                    .upsert(
                        self.tenant_id,
                        self.conversation_id,
                        LeadUpdate { stage, score, objections, preferred_plan_id, next_action },
                    )
                    .await
                    .map_err(|e| Self::repo_error("create_lead", e))?;
                Ok(json!({
                    "success": true,
                    "lead_id": lead.id,
                    "stage": lead.stage.as_str(),
                    "score": lead.score,
                }))
            }
            ToolCall::RequestHandoff { reason, summary } => {
                if !self.handoff_enabled {
                    return Err(ToolError::Disabled { tool: "request_handoff" });
                }
                let outcome = ConversationRepository::new(self.pool.clone())
                    .request_handoff(self.tenant_id, self.conversation_id, &reason, &summary)
                    .await
                    .map_err(|e| Self::repo_error("request_handoff", e))?;
                Ok(json!({
                    "success": true,
                    "status": outcome.conversation.status.as_str(),
                    "handoff_requested": true,
                    "reason": reason,
                    "lead_stage": outcome.lead.stage.as_str(),
                    "lead_score": outcome.lead.score,
                    "message": "Conversation transferred to a human agent.",
                }))
            }
            ToolCall::GetFunnelMetrics { start_date, end_date } => {
                self.require_analytics("get_funnel_metrics")?;
                let start = parse_day("get_funnel_metrics", start_date.as_deref())?;
                let end = parse_day("get_funnel_metrics", end_date.as_deref())?;
                let metrics = AnalyticsRepository::new(self.pool.clone())
                    .funnel_metrics(self.tenant_id, start, end)
                    .await
                    .map_err(|e| Self::repo_error("get_funnel_metrics", e))?;
                serde_json::to_value(&metrics).map_err(|e| ToolError::Execution {
                    tool: "get_funnel_metrics",
                    message: e.to_string(),
                })
            }
            ToolCall::GetConversationsByStage { stage } => {
                self.require_analytics("get_conversations_by_stage")?;
                let stage = stage.parse::<FunnelStage>().map_err(|e| {
                    ToolError::InvalidArguments {
                        tool: "get_conversations_by_stage",
                        message: e.to_string(),
                    }
                })?;
                let conversations = AnalyticsRepository::new(self.pool.clone())
                    .conversations_by_stage(self.tenant_id, stage, 50)
                    .await
                    .map_err(|e| Self::repo_error("get_conversations_by_stage", e))?;
                Ok(json!({
                    "success": true,
                    "stage": stage.as_str(),
                    "count": conversations.len(),
                    "conversations": conversations,
                }))
            }
            ToolCall::GetCommonObjections => {
                self.require_analytics("get_common_objections")?;
                let report = AnalyticsRepository::new(self.pool.clone())
                    .common_objections(self.tenant_id)
                    .await
                    .map_err(|e| Self::repo_error("get_common_objections", e))?;
                serde_json::to_value(&report).map_err(|e| ToolError::Execution {
                    tool: "get_common_objections",
                    message: e.to_string(),
                })
            }
            ToolCall::GetPlanPerformance => {
                self.require_analytics("get_plan_performance")?;
                let performance = AnalyticsRepository::new(self.pool.clone())
                    .plan_performance(self.tenant_id)
                    .await
                    .map_err(|e| Self::repo_error("get_plan_performance", e))?;
                Ok(json!({ "success": true, "plans": performance }))
            }
            ToolCall::GetRecentLeads { limit } => {
                self.require_analytics("get_recent_leads")?;
                let leads = AnalyticsRepository::new(self.pool.clone())
                    .recent_leads(self.tenant_id, limit.unwrap_or(10))
                    .await
                    .map_err(|e| Self::repo_error("get_recent_leads", e))?;
                Ok(json!({ "success": true, "total": leads.len(), "leads": leads }))
            }
        }
    }
}

fn plan_json(plan: &funnelbot_core::domain::plan::Plan) -> Value {
    json!({
        "name": plan.name,
        "slug": plan.slug,
        "price": plan.price.to_string(),
        "billing_cycle": plan.billing_cycle.as_str(),
        "features": plan.features,
        "description": plan.description,
    })
}

fn truncate(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

pub fn parse_day(
    tool: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ToolError> {
    raw.map(|value| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|date| {
                date.and_hms_opt(0, 0, 0)
                    .map(|naive| naive.and_utc())
                    .unwrap_or_else(Utc::now)
            })
            .map_err(|_| ToolError::InvalidArguments {
                tool,
                message: format!("`{value}` is not a YYYY-MM-DD date"),
            })
    })
    .transpose()
}
