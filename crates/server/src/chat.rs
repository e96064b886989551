//! Chat orchestration.
//!
//! Resolves the user and conversation within the request's tenant, blocks
//! handed-off conversations, and runs the agent. The provider call happens
//! outside any transaction; only the message writes before and after it
//! are guarded.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use funnelbot_agent::llm::ChatMessage;
use funnelbot_agent::runtime::{AgentInvocation, AgentRuntime};
use funnelbot_agent::tools::{specs_for, AgentPersona};
use funnelbot_core::auth::is_admin_name;
use funnelbot_core::domain::conversation::{Conversation, ConversationStatus};
use funnelbot_core::domain::message::MessageRole;
use funnelbot_core::domain::prompt::PromptType;
use funnelbot_db::repositories::{
    ConversationRepository, MessageRepository, PlanRepository, UserRepository,
};

use crate::bootstrap::AppState;
use crate::errors::ApiError;
use crate::prompts::DEFAULT_KNOWLEDGE_SLUG;
use crate::tenancy::TenantContext;
use crate::tools_impl::ScopedToolExecutor;

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    pub user_key: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponseBody {
    pub response: String,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub funnel_stage: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Json<ChatResponseBody>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::Validation("message must not be empty".to_owned()));
    }
    if body.user_key.trim().is_empty() {
        return Err(ApiError::Validation("user_key must not be empty".to_owned()));
    }

    let users = UserRepository::new(state.db_pool.clone());
    let conversations = ConversationRepository::new(state.db_pool.clone());
    let messages = MessageRepository::new(state.db_pool.clone());

    let user = users
        .get_or_create(context.tenant_id, &body.user_key, body.user_name.as_deref())
        .await?;

    let conversation = match body.conversation_id {
        // A conversation id from another tenant misses the scoped lookup
        // and reads as plain not-found; existence never leaks.
        Some(id) => conversations
            .find(context.tenant_id, id)
            .await?
            .filter(|conversation| conversation.user_id == user.id)
            .ok_or(ApiError::NotFound("conversation"))?,
        None => match conversations.find_open_for_user(context.tenant_id, user.id).await? {
            Some(conversation) => conversation,
            None => conversations.create(context.tenant_id, user.id).await?,
        },
    };

    if conversation.status == ConversationStatus::AwaitingHuman {
        // The turn is still recorded for the human who picks this up.
        messages
            .append(context.tenant_id, conversation.id, MessageRole::User, &body.message, None)
            .await?;
        return Ok(Json(blocked_response(&conversation, user.id)));
    }

    let history = messages
        .recent(context.tenant_id, conversation.id, state.config.agent.history_limit)
        .await?
        .iter()
        .filter_map(|message| match message.role {
            MessageRole::User => Some(ChatMessage::user(&message.content)),
            MessageRole::Assistant => Some(ChatMessage::assistant(&message.content)),
            MessageRole::System => None,
        })
        .collect::<Vec<_>>();

    messages
        .append(context.tenant_id, conversation.id, MessageRole::User, &body.message, None)
        .await?;

    let is_admin = is_admin_name(user.name.as_deref(), &state.config.agent.admin_keywords);
    let persona = if is_admin { AgentPersona::Admin } else { AgentPersona::Sales };
    let system_prompt = build_system_prompt(&state, &context, persona, &conversation, &user.name)
        .await?;

    let handoff_enabled = context.config.features.enable_handoff;
    let analytics_enabled = is_admin && context.config.features.enable_analytics;
    let executor = ScopedToolExecutor::new(
        state.db_pool.clone(),
        context.tenant_id,
        conversation.id,
        user.user_key.clone(),
        handoff_enabled,
        analytics_enabled,
    );

    let runtime = AgentRuntime::new(
        state.llm.clone(),
        state.config.llm.max_retries,
        state.config.agent.max_tool_rounds,
    );
    let invocation = AgentInvocation {
        system_prompt,
        history,
        user_message: body.message.clone(),
        model: context.config.llm.model.clone().unwrap_or_else(|| state.config.llm.model.clone()),
        temperature: context.config.llm.temperature.unwrap_or(state.config.llm.temperature),
        tools: specs_for(persona, handoff_enabled),
    };

    let reply = runtime.respond(invocation, &executor).await?;

    let trace = if reply.tool_trace.is_empty() {
        None
    } else {
        serde_json::to_value(&reply.tool_trace).ok()
    };
    messages
        .append(context.tenant_id, conversation.id, MessageRole::Assistant, &reply.content, trace)
        .await?;

    // Tools may have moved the conversation; report the fresh state.
    let refreshed = conversations
        .find(context.tenant_id, conversation.id)
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;

    tracing::info!(
        tenant = %context.slug,
        conversation_id = %refreshed.id,
        funnel_stage = refreshed.funnel_stage.as_str(),
        status = refreshed.status.as_str(),
        "chat turn completed"
    );

    Ok(Json(ChatResponseBody {
        response: reply.content,
        conversation_id: refreshed.id,
        user_id: user.id,
        funnel_stage: refreshed.funnel_stage.as_str().to_owned(),
        status: refreshed.status.as_str().to_owned(),
        blocked: None,
        handoff_reason: None,
    }))
}

fn blocked_response(conversation: &Conversation, user_id: Uuid) -> ChatResponseBody {
    let reason = conversation
        .handoff_reason
        .clone()
        .unwrap_or_else(|| "escalated to a human agent".to_owned());
    ChatResponseBody {
        response: format!(
            "This conversation has been transferred to a human agent.\n\nReason: {reason}\n\n\
             A member of our team will contact you shortly. Your message has been recorded."
        ),
        conversation_id: conversation.id,
        user_id,
        funnel_stage: conversation.funnel_stage.as_str().to_owned(),
        status: conversation.status.as_str().to_owned(),
        blocked: Some(true),
        handoff_reason: conversation.handoff_reason.clone(),
    }
}

async fn build_system_prompt(
    state: &AppState,
    context: &TenantContext,
    persona: AgentPersona,
    conversation: &Conversation,
    user_name: &Option<String>,
) -> Result<String, ApiError> {
    let prompt_type = match persona {
        AgentPersona::Sales => PromptType::SalesAgent,
        AgentPersona::Admin => PromptType::AdminAgent,
    };
    let mut prompt = state
        .prompts
        .system_prompt(&state.db_pool, context.tenant_id, prompt_type)
        .await?;

    if persona == AgentPersona::Sales {
        if let Some(knowledge) = state
            .prompts
            .knowledge(&state.db_pool, context.tenant_id, DEFAULT_KNOWLEDGE_SLUG)
            .await?
        {
            prompt.push_str("\n\n## Knowledge base\n");
            prompt.push_str(&knowledge);
        }

        let plans = PlanRepository::new(state.db_pool.clone())
            .list_active(context.tenant_id)
            .await?;
        if !plans.is_empty() {
            prompt.push_str("\n\n## Available plans\n");
            for plan in &plans {
                prompt.push_str(&format!(
                    "- {} ({}): {} {} per {}\n",
                    plan.name,
                    plan.slug,
                    context.config.currency,
                    plan.price,
                    plan.billing_cycle.as_str(),
                ));
            }
        }
    }

    prompt.push_str("\n\n## Conversation context\n");
    if let Some(name) = user_name {
        prompt.push_str(&format!("Customer name: {name}\n"));
    }
    prompt.push_str(&format!(
        "Current funnel stage: {}\n",
        conversation.funnel_stage.as_str()
    ));
    if let Some(summary) = &conversation.context_summary {
        prompt.push_str(&format!("Summary so far: {summary}\n"));
    }

    Ok(prompt)
}
