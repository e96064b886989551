//! Seed helpers shared by tests across crates.

use rust_decimal::Decimal;

use funnelbot_core::domain::plan::{BillingCycle, Plan};
use funnelbot_core::domain::tenant::{Tenant, TenantConfig, TenantStatus};
use uuid::Uuid;

use crate::migrations::run_pending;
use crate::repositories::{NewPlan, PlanRepository, TenantRepository};
use crate::{connect_with_settings, DbPool};

/// In-memory single-connection pool with migrations applied. A single
/// connection keeps `sqlite::memory:` pointing at one database.
pub async fn memory_pool() -> DbPool {
    let pool =
        connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect to memory sqlite");
    run_pending(&pool).await.expect("run migrations");
    pool
}

/// Create a tenant and return it with its raw API key.
pub async fn seed_tenant(pool: &DbPool, slug: &str) -> (Tenant, String) {
    TenantRepository::new(pool.clone())
        .create(slug, &format!("{slug} Inc"), TenantConfig::default(), TenantStatus::Active)
        .await
        .expect("seed tenant")
}

/// Create an active plan under a tenant.
pub async fn seed_plan(pool: &DbPool, tenant_id: Uuid, slug: &str, price: Decimal) -> Plan {
    PlanRepository::new(pool.clone())
        .create(
            tenant_id,
            NewPlan {
                name: slug.replace('-', " "),
                slug: slug.to_owned(),
                price,
                billing_cycle: BillingCycle::Monthly,
                features: vec!["24/7 access".to_owned()],
                description: None,
            },
        )
        .await
        .expect("seed plan")
}
