//! Platform-level tenant management.
//!
//! These routes sit outside tenant authentication: they are the surface
//! that creates tenants in the first place. Creation and key rotation are
//! the only two places the raw API key ever appears, and each returns it
//! exactly once.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use funnelbot_core::domain::tenant::{Tenant, TenantConfig, TenantStatus};
use funnelbot_db::repositories::{TenantRepository, TenantUpdate};

use crate::bootstrap::AppState;
use crate::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateTenantBody {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub config: TenantConfig,
    #[serde(default)]
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Serialize)]
pub struct TenantWithKey {
    #[serde(flatten)]
    pub tenant: Tenant,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<TenantConfig>,
    #[serde(default)]
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RotatedKey {
    pub slug: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct DeactivatedTenant {
    pub message: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateTenantBody>,
) -> Result<(StatusCode, Json<TenantWithKey>), ApiError> {
    let (tenant, api_key) = TenantRepository::new(state.db_pool.clone())
        .create(
            &body.slug,
            &body.name,
            body.config,
            body.status.unwrap_or(TenantStatus::Active),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(TenantWithKey { tenant, api_key })))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    let tenants = TenantRepository::new(state.db_pool.clone())
        .list(query.limit.unwrap_or(100), query.skip.unwrap_or(0))
        .await?;
    Ok(Json(tenants))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant = TenantRepository::new(state.db_pool.clone()).get(&slug).await?;
    Ok(Json(tenant))
}

pub async fn update(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<UpdateTenantBody>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant = TenantRepository::new(state.db_pool.clone())
        .update(
            &slug,
            TenantUpdate { name: body.name, config: body.config, status: body.status },
        )
        .await?;
    Ok(Json(tenant))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<DeactivatedTenant>, ApiError> {
    TenantRepository::new(state.db_pool.clone()).deactivate(&slug).await?;
    Ok(Json(DeactivatedTenant { message: format!("Tenant '{slug}' deactivated") }))
}

pub async fn rotate_key(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<RotatedKey>, ApiError> {
    let api_key = TenantRepository::new(state.db_pool.clone()).rotate_key(&slug).await?;
    Ok(Json(RotatedKey { slug, api_key }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;

    use funnelbot_agent::llm::ScriptedLlmClient;
    use funnelbot_core::config::AppConfig;
    use funnelbot_core::domain::tenant::{TenantConfig, TenantStatus};
    use funnelbot_db::fixtures::memory_pool;
    use funnelbot_db::TenantRepository;

    use super::{create, deactivate, get_one, list, rotate_key, CreateTenantBody, ListQuery};
    use crate::bootstrap::AppState;
    use crate::errors::ApiError;
    use crate::prompts::PromptCache;

    fn state_with(pool: funnelbot_db::DbPool) -> AppState {
        AppState {
            config: Arc::new(AppConfig::default()),
            db_pool: pool,
            llm: Arc::new(ScriptedLlmClient::replying("hi")),
            prompts: PromptCache::new(),
        }
    }

    fn body(slug: &str) -> CreateTenantBody {
        CreateTenantBody {
            slug: slug.to_owned(),
            name: format!("{slug} Inc"),
            config: TenantConfig::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn creation_returns_the_raw_key_exactly_once() {
        let pool = memory_pool().await;
        let state = state_with(pool.clone());

        let (status, Json(created)) =
            create(State(state.clone()), Json(body("acme"))).await.expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.api_key.starts_with("ac_"));
        assert_eq!(created.tenant.api_key_prefix, &created.api_key[..8]);

        // No later read surfaces the key again.
        let Json(fetched) =
            get_one(State(state.clone()), Path("acme".to_owned())).await.expect("get");
        let serialized = serde_json::to_string(&fetched).expect("serialize");
        assert!(!serialized.contains(&created.api_key));

        let verified = TenantRepository::new(pool)
            .verify("acme", &created.api_key)
            .await
            .expect("verify");
        assert_eq!(verified.slug, "acme");
    }

    #[tokio::test]
    async fn duplicate_slug_is_a_conflict() {
        let pool = memory_pool().await;
        let state = state_with(pool);

        create(State(state.clone()), Json(body("acme"))).await.expect("create");
        let duplicate = create(State(state), Json(body("acme"))).await;
        assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn invalid_slug_is_a_validation_error() {
        let pool = memory_pool().await;
        let state = state_with(pool);

        let result = create(State(state), Json(body("Not A Slug"))).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn deactivation_keeps_the_tenant_listed_but_cancelled() {
        let pool = memory_pool().await;
        let state = state_with(pool);

        create(State(state.clone()), Json(body("acme"))).await.expect("create");
        deactivate(State(state.clone()), Path("acme".to_owned())).await.expect("deactivate");

        let Json(tenants) = list(
            State(state),
            Query(ListQuery { skip: None, limit: None }),
        )
        .await
        .expect("list");
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].status, TenantStatus::Cancelled);
    }

    #[tokio::test]
    async fn rotation_swaps_the_verifying_key() {
        let pool = memory_pool().await;
        let state = state_with(pool.clone());

        let (_, Json(created)) =
            create(State(state.clone()), Json(body("acme"))).await.expect("create");
        let Json(rotated) =
            rotate_key(State(state), Path("acme".to_owned())).await.expect("rotate");
        assert_ne!(created.api_key, rotated.api_key);

        let repo = TenantRepository::new(pool);
        assert!(repo.verify("acme", &rotated.api_key).await.is_ok());
        assert!(repo.verify("acme", &created.api_key).await.is_err());
    }

    #[tokio::test]
    async fn missing_tenant_is_not_found() {
        let pool = memory_pool().await;
        let state = state_with(pool);

        let result = get_one(State(state), Path("ghost".to_owned())).await;
        assert!(matches!(result, Err(ApiError::NotFound("tenant"))));
    }
}
