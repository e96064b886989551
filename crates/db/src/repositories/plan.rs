use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use funnelbot_core::domain::plan::{BillingCycle, Plan};
use funnelbot_core::errors::DomainError;

use super::{is_unique_violation, row_bool, row_datetime, row_enum, row_json, row_uuid, RepositoryError};
use crate::DbPool;

pub struct PlanRepository {
    pool: DbPool,
}

#[derive(Clone, Debug)]
pub struct NewPlan {
    pub name: String,
    pub slug: String,
    pub price: Decimal,
    pub billing_cycle: BillingCycle,
    pub features: Vec<String>,
    pub description: Option<String>,
}

impl PlanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, tenant_id: Uuid, plan: NewPlan) -> Result<Plan, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let features_json = serde_json::to_string(&plan.features)
            .map_err(|err| RepositoryError::Decode(format!("features encode: {err}")))?;

        let inserted = sqlx::query(
            "INSERT INTO plans (id, tenant_id, name, slug, price, billing_cycle, features,
                                description, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(&plan.name)
        .bind(&plan.slug)
        .bind(plan.price.to_string())
        .bind(plan.billing_cycle.as_str())
        .bind(&features_json)
        .bind(&plan.description)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                return Err(DomainError::Conflict { entity: "plan", value: plan.slug }.into());
            }
            Err(error) => return Err(error.into()),
        }

        Ok(Plan {
            id,
            tenant_id,
            name: plan.name,
            slug: plan.slug,
            price: plan.price,
            billing_cycle: plan.billing_cycle,
            features: plan.features,
            description: plan.description,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, slug, price, billing_cycle, features, description,
                    is_active, created_at, updated_at
             FROM plans WHERE tenant_id = ? AND is_active = 1 ORDER BY price ASC",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_plan).collect()
    }

    pub async fn find_by_slug(
        &self,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, slug, price, billing_cycle, features, description,
                    is_active, created_at, updated_at
             FROM plans WHERE tenant_id = ? AND slug = ?",
        )
        .bind(tenant_id.to_string())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_plan(&row)).transpose()
    }
}

fn decode_plan(row: &SqliteRow) -> Result<Plan, RepositoryError> {
    let price_raw: String = sqlx::Row::try_get(row, "price")?;
    let price = price_raw
        .parse::<Decimal>()
        .map_err(|_| RepositoryError::Decode(format!("plan price is not a decimal: `{price_raw}`")))?;

    Ok(Plan {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        name: sqlx::Row::try_get(row, "name")?,
        slug: sqlx::Row::try_get(row, "slug")?,
        price,
        billing_cycle: row_enum(row, "billing_cycle")?,
        features: row_json(row, "features")?,
        description: sqlx::Row::try_get(row, "description")?,
        is_active: row_bool(row, "is_active")?,
        created_at: row_datetime(row, "created_at")?,
        updated_at: row_datetime(row, "updated_at")?,
    })
}
