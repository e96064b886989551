//! Tenant directory and credential verifier.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use thiserror::Error;
use uuid::Uuid;

use funnelbot_core::credentials::{issue_api_key, verify_api_key};
use funnelbot_core::domain::tenant::{Tenant, TenantConfig, TenantStatus};
use funnelbot_core::errors::{AuthError, DomainError};

use super::{is_unique_violation, row_datetime, row_enum, row_json, row_uuid, RepositoryError};
use crate::DbPool;

pub struct TenantRepository {
    pool: DbPool,
}

/// Partial update for a tenant. Slug is immutable and has no field here.
#[derive(Clone, Debug, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub config: Option<TenantConfig>,
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a tenant and issue its API key. The raw key is returned
    /// exactly once here; only the salted hash and the display prefix are
    /// persisted.
    pub async fn create(
        &self,
        slug: &str,
        name: &str,
        config: TenantConfig,
        status: TenantStatus,
    ) -> Result<(Tenant, String), RepositoryError> {
        Tenant::validate_slug(slug)?;

        let issued = issue_api_key(slug);
        let now = Utc::now();
        let id = Uuid::new_v4();
        let config_json = serde_json::to_string(&config)
            .map_err(|err| RepositoryError::Decode(format!("tenant config encode: {err}")))?;

        let inserted = sqlx::query(
            "INSERT INTO tenants (id, slug, name, config, api_key_hash, api_key_prefix, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(slug)
        .bind(name)
        .bind(&config_json)
        .bind(&issued.hash)
        .bind(&issued.prefix)
        .bind(status.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                return Err(DomainError::Conflict { entity: "tenant", value: slug.to_owned() }
                    .into());
            }
            Err(error) => return Err(error.into()),
        }

        tracing::info!(tenant = %slug, key_prefix = %issued.prefix, "tenant created");

        let tenant = Tenant {
            id,
            slug: slug.to_owned(),
            name: name.to_owned(),
            config,
            api_key_prefix: issued.prefix,
            status,
            created_at: now,
            updated_at: now,
        };
        Ok((tenant, issued.raw))
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, slug, name, config, api_key_prefix, status, created_at, updated_at
             FROM tenants WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_tenant(&row)).transpose()
    }

    pub async fn get(&self, slug: &str) -> Result<Tenant, RepositoryError> {
        self.find_by_slug(slug).await?.ok_or_else(|| RepositoryError::not_found("tenant"))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Tenant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, slug, name, config, api_key_prefix, status, created_at, updated_at
             FROM tenants ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit.clamp(1, 100))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_tenant).collect()
    }

    /// Verify a presented (slug, key) pair. Read-only; the single
    /// authentication choke point calls this and nothing downstream
    /// re-checks credentials.
    pub async fn verify(&self, slug: &str, presented_key: &str) -> Result<Tenant, VerifyError> {
        let row = sqlx::query(
            "SELECT id, slug, name, config, api_key_hash, api_key_prefix, status, created_at, updated_at
             FROM tenants WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let Some(row) = row else {
            return Err(AuthError::TenantNotFound { slug: slug.to_owned() }.into());
        };

        let tenant = decode_tenant(&row)?;
        if !tenant.status.can_authenticate() {
            return Err(AuthError::TenantSuspended {
                slug: slug.to_owned(),
                status: tenant.status.as_str().to_owned(),
            }
            .into());
        }

        let hash: Option<String> =
            sqlx::Row::try_get(&row, "api_key_hash").map_err(RepositoryError::from)?;
        let Some(hash) = hash else {
            tracing::warn!(tenant = %slug, "tenant has no API key configured");
            return Err(AuthError::InvalidCredentials.into());
        };

        if verify_api_key(&hash, presented_key) {
            Ok(tenant)
        } else {
            tracing::warn!(tenant = %slug, "API key verification failed");
            Err(AuthError::InvalidCredentials.into())
        }
    }

    pub async fn update(&self, slug: &str, update: TenantUpdate) -> Result<Tenant, RepositoryError> {
        let current = self.get(slug).await?;

        let name = update.name.unwrap_or(current.name);
        let config = update.config.unwrap_or(current.config);
        let status = update.status.unwrap_or(current.status);
        let now = Utc::now();
        let config_json = serde_json::to_string(&config)
            .map_err(|err| RepositoryError::Decode(format!("tenant config encode: {err}")))?;

        sqlx::query("UPDATE tenants SET name = ?, config = ?, status = ?, updated_at = ? WHERE slug = ?")
            .bind(&name)
            .bind(&config_json)
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(slug)
            .execute(&self.pool)
            .await?;

        Ok(Tenant { name, config, status, updated_at: now, ..current })
    }

    /// Soft delete: tenants are never removed, only cancelled.
    pub async fn deactivate(&self, slug: &str) -> Result<Tenant, RepositoryError> {
        let updated = self
            .update(slug, TenantUpdate { status: Some(TenantStatus::Cancelled), ..TenantUpdate::default() })
            .await?;
        tracing::info!(tenant = %slug, "tenant deactivated");
        Ok(updated)
    }

    /// Issue a replacement key. The previous hash stops verifying and the
    /// new raw key is returned exactly once.
    pub async fn rotate_key(&self, slug: &str) -> Result<String, RepositoryError> {
        let current = self.get(slug).await?;
        let issued = issue_api_key(&current.slug);
        let now = Utc::now();

        sqlx::query(
            "UPDATE tenants SET api_key_hash = ?, api_key_prefix = ?, updated_at = ? WHERE slug = ?",
        )
        .bind(&issued.hash)
        .bind(&issued.prefix)
        .bind(now.to_rfc3339())
        .bind(slug)
        .execute(&self.pool)
        .await?;

        tracing::info!(tenant = %slug, key_prefix = %issued.prefix, "tenant API key rotated");
        Ok(issued.raw)
    }
}

fn decode_tenant(row: &SqliteRow) -> Result<Tenant, RepositoryError> {
    Ok(Tenant {
        id: row_uuid(row, "id")?,
        slug: sqlx::Row::try_get(row, "slug")?,
        name: sqlx::Row::try_get(row, "name")?,
        config: row_json::<TenantConfig>(row, "config")?,
        api_key_prefix: sqlx::Row::try_get::<Option<String>, _>(row, "api_key_prefix")?
            .unwrap_or_default(),
        status: row_enum(row, "status")?,
        created_at: row_datetime(row, "created_at")?,
        updated_at: row_datetime(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use funnelbot_core::domain::tenant::{TenantConfig, TenantStatus};
    use funnelbot_core::errors::{AuthError, DomainError};

    use super::{TenantRepository, TenantUpdate, VerifyError};
    use crate::fixtures::memory_pool;
    use crate::repositories::RepositoryError;

    #[tokio::test]
    async fn created_tenant_verifies_with_its_raw_key_only() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        let (tenant, raw_key) = repo
            .create("acme", "Acme Inc", TenantConfig::default(), TenantStatus::Active)
            .await
            .expect("create tenant");
        assert_eq!(tenant.slug, "acme");
        assert_eq!(tenant.api_key_prefix.len(), 8);

        let verified = repo.verify("acme", &raw_key).await.expect("verify");
        assert_eq!(verified.id, tenant.id);

        let wrong = repo.verify("acme", "wrong").await;
        assert!(matches!(wrong, Err(VerifyError::Auth(AuthError::InvalidCredentials))));

        let ghost = repo.verify("ghost", &raw_key).await;
        assert!(matches!(
            ghost,
            Err(VerifyError::Auth(AuthError::TenantNotFound { ref slug })) if slug == "ghost"
        ));
    }

    #[tokio::test]
    async fn suspended_tenant_never_verifies_even_with_correct_key() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        let (_, raw_key) = repo
            .create("acme", "Acme Inc", TenantConfig::default(), TenantStatus::Active)
            .await
            .expect("create tenant");

        repo.update(
            "acme",
            TenantUpdate { status: Some(TenantStatus::Suspended), ..TenantUpdate::default() },
        )
        .await
        .expect("suspend tenant");

        let result = repo.verify("acme", &raw_key).await;
        assert!(matches!(result, Err(VerifyError::Auth(AuthError::TenantSuspended { .. }))));
    }

    #[tokio::test]
    async fn trial_tenants_can_authenticate() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        let (_, raw_key) = repo
            .create("trialco", "Trial Co", TenantConfig::default(), TenantStatus::Trial)
            .await
            .expect("create tenant");

        assert!(repo.verify("trialco", &raw_key).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_slug_is_a_conflict() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        repo.create("acme", "Acme Inc", TenantConfig::default(), TenantStatus::Active)
            .await
            .expect("create tenant");
        let duplicate = repo
            .create("acme", "Acme Again", TenantConfig::default(), TenantStatus::Active)
            .await;

        assert!(matches!(
            duplicate,
            Err(RepositoryError::Domain(DomainError::Conflict { entity: "tenant", .. }))
        ));
    }

    #[tokio::test]
    async fn malformed_slug_is_rejected() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        let result = repo
            .create("Not A Slug", "Bad", TenantConfig::default(), TenantStatus::Active)
            .await;
        assert!(matches!(
            result,
            Err(RepositoryError::Domain(DomainError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn rotation_invalidates_the_previous_key() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        let (_, old_key) = repo
            .create("acme", "Acme Inc", TenantConfig::default(), TenantStatus::Active)
            .await
            .expect("create tenant");
        let new_key = repo.rotate_key("acme").await.expect("rotate");

        assert!(repo.verify("acme", &new_key).await.is_ok());
        assert!(matches!(
            repo.verify("acme", &old_key).await,
            Err(VerifyError::Auth(AuthError::InvalidCredentials))
        ));
    }

    #[tokio::test]
    async fn deactivation_is_a_status_transition_not_a_delete() {
        let pool = memory_pool().await;
        let repo = TenantRepository::new(pool);

        repo.create("acme", "Acme Inc", TenantConfig::default(), TenantStatus::Active)
            .await
            .expect("create tenant");
        let deactivated = repo.deactivate("acme").await.expect("deactivate");
        assert_eq!(deactivated.status, TenantStatus::Cancelled);

        let still_there = repo.find_by_slug("acme").await.expect("lookup");
        assert!(still_there.is_some());
    }
}
