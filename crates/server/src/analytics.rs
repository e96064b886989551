//! Admin-gated analytics endpoints, all scoped to the resolved tenant.
//!
//! The gate is the inherited name heuristic: the caller passes a
//! `user_key`, the user is resolved within the tenant, and their display
//! name must contain an admin keyword. Weak by design and documented as
//! such; it is an operator convenience, not a security boundary.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use funnelbot_core::auth::is_admin_name;
use funnelbot_core::domain::user::User;
use funnelbot_core::funnel::FunnelStage;
use funnelbot_db::repositories::analytics::{
    ConversationDigest, FunnelMetrics, LeadDigest, ObjectionReport, PlanPerformance,
};
use funnelbot_db::repositories::{AnalyticsRepository, UserRepository};

use crate::bootstrap::AppState;
use crate::errors::ApiError;
use crate::tenancy::TenantContext;

#[derive(Debug, Deserialize)]
pub struct FunnelQuery {
    pub user_key: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub user_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StageQuery {
    pub user_key: String,
    pub stage: String,
}

#[derive(Debug, Deserialize)]
pub struct LeadsQuery {
    pub user_key: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StageResponse {
    pub stage: String,
    pub count: usize,
    pub conversations: Vec<ConversationDigest>,
}

#[derive(Debug, Serialize)]
pub struct LeadsResponse {
    pub total: usize,
    pub leads: Vec<LeadDigest>,
}

#[derive(Debug, Serialize)]
pub struct PlansPerformanceResponse {
    pub total_plans: usize,
    pub plans: Vec<PlanPerformance>,
}

pub async fn funnel(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Query(query): Query<FunnelQuery>,
) -> Result<Json<FunnelMetrics>, ApiError> {
    require_admin(&state, &context, &query.user_key).await?;
    let start = parse_day_param("start_date", query.start_date.as_deref())?;
    let end = parse_day_param("end_date", query.end_date.as_deref())?;

    let metrics = AnalyticsRepository::new(state.db_pool.clone())
        .funnel_metrics(context.tenant_id, start, end)
        .await?;
    Ok(Json(metrics))
}

pub async fn plans_performance(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<PlansPerformanceResponse>, ApiError> {
    require_admin(&state, &context, &query.user_key).await?;
    let plans = AnalyticsRepository::new(state.db_pool.clone())
        .plan_performance(context.tenant_id)
        .await?;
    Ok(Json(PlansPerformanceResponse { total_plans: plans.len(), plans }))
}

pub async fn objections(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<ObjectionReport>, ApiError> {
    require_admin(&state, &context, &query.user_key).await?;
    let report = AnalyticsRepository::new(state.db_pool.clone())
        .common_objections(context.tenant_id)
        .await?;
    Ok(Json(report))
}

pub async fn conversations_by_stage(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Query(query): Query<StageQuery>,
) -> Result<Json<StageResponse>, ApiError> {
    require_admin(&state, &context, &query.user_key).await?;
    let stage = query
        .stage
        .parse::<FunnelStage>()
        .map_err(|error| ApiError::Validation(error.to_string()))?;

    let conversations = AnalyticsRepository::new(state.db_pool.clone())
        .conversations_by_stage(context.tenant_id, stage, 50)
        .await?;
    Ok(Json(StageResponse {
        stage: stage.as_str().to_owned(),
        count: conversations.len(),
        conversations,
    }))
}

pub async fn recent_leads(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<LeadsResponse>, ApiError> {
    require_admin(&state, &context, &query.user_key).await?;
    let leads = AnalyticsRepository::new(state.db_pool.clone())
        .recent_leads(context.tenant_id, query.limit.unwrap_or(10))
        .await?;
    Ok(Json(LeadsResponse { total: leads.len(), leads }))
}

async fn require_admin(
    state: &AppState,
    context: &TenantContext,
    user_key: &str,
) -> Result<User, ApiError> {
    if !context.config.features.enable_analytics {
        return Err(ApiError::Forbidden("Analytics is disabled for this tenant".to_owned()));
    }

    let user = UserRepository::new(state.db_pool.clone())
        .find_by_key(context.tenant_id, user_key)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if !is_admin_name(user.name.as_deref(), &state.config.agent.admin_keywords) {
        tracing::warn!(tenant = %context.slug, user_key = %user_key, "analytics access denied");
        return Err(ApiError::Forbidden(
            "Access denied. Admin privileges required.".to_owned(),
        ));
    }
    Ok(user)
}

fn parse_day_param(
    name: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.map(|value| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|date| {
                date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()).unwrap_or_else(Utc::now)
            })
            .map_err(|_| {
                ApiError::Validation(format!("{name} `{value}` is not a YYYY-MM-DD date"))
            })
    })
    .transpose()
}
