//! Tenant resolution middleware.
//!
//! The single authentication choke point: every tenant-scoped request
//! passes through here and either gets a [`TenantContext`] attached or is
//! rejected before any business logic runs. Downstream handlers trust the
//! context and never re-check credentials.

use axum::extract::{Request, State};
use axum::http::header::HeaderValue;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use funnelbot_core::domain::tenant::{Tenant, TenantConfig};
use funnelbot_core::errors::AuthError;
use funnelbot_db::TenantRepository;

use crate::bootstrap::AppState;
use crate::errors::ApiError;

/// Request-scoped, authenticated tenant identity. Lives in the request's
/// extensions only; nothing outlives the request.
#[derive(Clone, Debug)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub slug: String,
    pub config: TenantConfig,
}

impl TenantContext {
    fn from_tenant(tenant: Tenant) -> Self {
        Self { tenant_id: tenant.id, slug: tenant.slug, config: tenant.config }
    }
}

pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = match resolve(&state, request.headers()).await {
        Ok(context) => context,
        Err(error) => return error.into_response(),
    };

    let slug = context.slug.clone();
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&slug) {
        response.headers_mut().insert("x-tenant-slug", value);
    }
    response
}

async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<TenantContext, ApiError> {
    let tenancy = &state.config.tenancy;
    let repository = TenantRepository::new(state.db_pool.clone());

    if !tenancy.multi_tenant_enabled {
        // Legacy single-tenant mode: headers are ignored entirely.
        let tenant = repository
            .find_by_slug(&tenancy.default_tenant_slug)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| {
                AuthError::DefaultTenantMissing { slug: tenancy.default_tenant_slug.clone() }
            })?;
        return Ok(TenantContext::from_tenant(tenant));
    }

    let slug = header_value(headers, &tenancy.tenant_header)
        .ok_or(AuthError::MissingTenantHeader)?;
    let api_key =
        header_value(headers, &tenancy.api_key_header).ok_or(AuthError::MissingApiKey)?;

    let tenant = repository.verify(&slug, &api_key).await?;
    tracing::debug!(tenant = %tenant.slug, "tenant resolved");
    Ok(TenantContext::from_tenant(tenant))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
