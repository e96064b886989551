use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::{middleware, Router};

use funnelbot_agent::llm::{HttpLlmClient, LlmClient};
use funnelbot_core::config::AppConfig;
use funnelbot_db::{connect, migrations, DbPool};

use crate::prompts::PromptCache;
use crate::{analytics, chat, tenancy, tenants};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: DbPool,
    pub llm: Arc<dyn LlmClient>,
    pub prompts: PromptCache,
}

pub async fn bootstrap_with_config(config: AppConfig) -> anyhow::Result<AppState> {
    let db_pool = connect(&config.database)
        .await
        .with_context(|| format!("connect to database `{}`", config.database.url))?;
    migrations::run_pending(&db_pool).await.context("run pending migrations")?;

    let llm =
        Arc::new(HttpLlmClient::from_config(&config.llm).context("construct llm client")?);

    tracing::info!(
        database_url = %config.database.url,
        llm_model = %config.llm.model,
        "bootstrap complete"
    );

    Ok(AppState { config: Arc::new(config), db_pool, llm, prompts: PromptCache::new() })
}

/// Tenant-scoped routes sit behind the resolution middleware; platform
/// tenant management does not (it is the surface that creates tenants in
/// the first place).
pub fn router(state: AppState) -> Router {
    let tenant_scoped = Router::new()
        .route("/chat", post(chat::chat))
        .route("/analytics/funnel", get(analytics::funnel))
        .route("/analytics/plans-performance", get(analytics::plans_performance))
        .route("/analytics/objections", get(analytics::objections))
        .route("/analytics/conversations", get(analytics::conversations_by_stage))
        .route("/analytics/leads", get(analytics::recent_leads))
        .layer(middleware::from_fn_with_state(state.clone(), tenancy::resolve_tenant));

    let platform = Router::new()
        .route("/admin/tenants", post(tenants::create).get(tenants::list))
        .route(
            "/admin/tenants/{slug}",
            get(tenants::get_one).put(tenants::update).delete(tenants::deactivate),
        )
        .route("/admin/tenants/{slug}/rotate-key", post(tenants::rotate_key));

    Router::new().merge(tenant_scoped).merge(platform).with_state(state)
}
