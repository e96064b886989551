use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use funnelbot_core::domain::lead::{Lead, LeadStage};

use super::{row_datetime, row_enum, row_json, row_opt_uuid, row_uuid, RepositoryError};
use crate::DbPool;

pub struct LeadRepository {
    pool: DbPool,
}

/// Fields an explicit `create_lead` can set. Anything absent keeps its
/// current (or default) value, which makes retries of the same logical
/// request converge on one lead.
#[derive(Clone, Debug, Default)]
pub struct LeadUpdate {
    pub stage: Option<LeadStage>,
    pub score: Option<i32>,
    pub objections: Option<Vec<String>>,
    pub preferred_plan_id: Option<Uuid>,
    pub next_action: Option<String>,
}

impl LeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, conversation_id, user_id, stage, score, objections,
                    preferred_plan_id, next_action, created_at, updated_at
             FROM leads WHERE tenant_id = ? AND conversation_id = ?
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(tenant_id.to_string())
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_lead(&row)).transpose()
    }

    /// Create or update the lead for a conversation. At most one lead per
    /// conversation is written through this path.
    pub async fn upsert(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        update: LeadUpdate,
    ) -> Result<Lead, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let conversation = sqlx::query(
            "SELECT user_id FROM conversations WHERE id = ? AND tenant_id = ?",
        )
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::not_found("conversation"))?;
        let user_id = row_uuid(&conversation, "user_id")?;

        if let Some(plan_id) = update.preferred_plan_id {
            ensure_plan_in_tenant(&mut tx, tenant_id, plan_id).await?;
        }

        let existing = find_by_conversation_in_tx(&mut tx, tenant_id, conversation_id).await?;
        let lead = match existing {
            Some(current) => {
                let stage = update.stage.unwrap_or(current.stage);
                let score = update.score.unwrap_or(current.score);
                let objections = update.objections.unwrap_or(current.objections);
                let preferred_plan_id = update.preferred_plan_id.or(current.preferred_plan_id);
                let next_action = update.next_action.or(current.next_action);
                let now = Utc::now();

                write_lead_update(
                    &mut tx,
                    current.id,
                    stage,
                    score,
                    &objections,
                    preferred_plan_id,
                    next_action.as_deref(),
                )
                .await?;

                Lead {
                    stage,
                    score,
                    objections,
                    preferred_plan_id,
                    next_action,
                    updated_at: now,
                    ..current
                }
            }
            None => {
                insert_lead(
                    &mut tx,
                    tenant_id,
                    conversation_id,
                    user_id,
                    update.stage.unwrap_or(LeadStage::Cold),
                    update.score.unwrap_or(0),
                    &update.objections.clone().unwrap_or_default(),
                    update.preferred_plan_id,
                    update.next_action.as_deref(),
                )
                .await?
            }
        };

        tx.commit().await?;
        Ok(lead)
    }
}

pub(crate) async fn ensure_plan_in_tenant(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    plan_id: Uuid,
) -> Result<(), RepositoryError> {
    let found = sqlx::query("SELECT 1 FROM plans WHERE id = ? AND tenant_id = ?")
        .bind(plan_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

    if found.is_none() {
        return Err(RepositoryError::isolation(format!(
            "plan {plan_id} does not belong to tenant {tenant_id}"
        )));
    }
    Ok(())
}

pub(crate) async fn find_by_conversation_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    conversation_id: Uuid,
) -> Result<Option<Lead>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, tenant_id, conversation_id, user_id, stage, score, objections,
                preferred_plan_id, next_action, created_at, updated_at
         FROM leads WHERE tenant_id = ? AND conversation_id = ?
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(tenant_id.to_string())
    .bind(conversation_id.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| decode_lead(&row)).transpose()
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_lead(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    conversation_id: Uuid,
    user_id: Uuid,
    stage: LeadStage,
    score: i32,
    objections: &[String],
    preferred_plan_id: Option<Uuid>,
    next_action: Option<&str>,
) -> Result<Lead, RepositoryError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let objections_json = serde_json::to_string(objections)
        .map_err(|err| RepositoryError::Decode(format!("objections encode: {err}")))?;

    sqlx::query(
        "INSERT INTO leads (id, tenant_id, conversation_id, user_id, stage, score, objections,
                            preferred_plan_id, next_action, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .bind(stage.as_str())
    .bind(score)
    .bind(&objections_json)
    .bind(preferred_plan_id.map(|p| p.to_string()))
    .bind(next_action)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(Lead {
        id,
        tenant_id,
        conversation_id,
        user_id,
        stage,
        score,
        objections: objections.to_vec(),
        preferred_plan_id,
        next_action: next_action.map(str::to_owned),
        created_at: now,
        updated_at: now,
    })
}

pub(crate) async fn write_lead_update(
    tx: &mut Transaction<'_, Sqlite>,
    lead_id: Uuid,
    stage: LeadStage,
    score: i32,
    objections: &[String],
    preferred_plan_id: Option<Uuid>,
    next_action: Option<&str>,
) -> Result<(), RepositoryError> {
    let objections_json = serde_json::to_string(objections)
        .map_err(|err| RepositoryError::Decode(format!("objections encode: {err}")))?;

    sqlx::query(
        "UPDATE leads SET stage = ?, score = ?, objections = ?, preferred_plan_id = ?,
                          next_action = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(stage.as_str())
    .bind(score)
    .bind(&objections_json)
    .bind(preferred_plan_id.map(|p| p.to_string()))
    .bind(next_action)
    .bind(Utc::now().to_rfc3339())
    .bind(lead_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub(crate) fn decode_lead(row: &SqliteRow) -> Result<Lead, RepositoryError> {
    Ok(Lead {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        conversation_id: row_uuid(row, "conversation_id")?,
        user_id: row_uuid(row, "user_id")?,
        stage: row_enum(row, "stage")?,
        score: sqlx::Row::try_get::<i64, _>(row, "score")? as i32,
        objections: row_json(row, "objections")?,
        preferred_plan_id: row_opt_uuid(row, "preferred_plan_id")?,
        next_action: sqlx::Row::try_get(row, "next_action")?,
        created_at: row_datetime(row, "created_at")?,
        updated_at: row_datetime(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use funnelbot_core::domain::lead::LeadStage;
    use rust_decimal::Decimal;

    use super::{LeadRepository, LeadUpdate};
    use crate::fixtures::{memory_pool, seed_plan, seed_tenant};
    use crate::repositories::{ConversationRepository, UserRepository};

    #[tokio::test]
    async fn upsert_creates_then_updates_the_same_lead() {
        let pool = memory_pool().await;
        let (tenant, _) = seed_tenant(&pool, "acme").await;
        let user = UserRepository::new(pool.clone())
            .get_or_create(tenant.id, "u1", None)
            .await
            .expect("user");
        let conversation = ConversationRepository::new(pool.clone())
            .create(tenant.id, user.id)
            .await
            .expect("conversation");
        let repo = LeadRepository::new(pool);

        let created = repo
            .upsert(
                tenant.id,
                conversation.id,
                LeadUpdate { stage: Some(LeadStage::Warm), score: Some(55), ..LeadUpdate::default() },
            )
            .await
            .expect("create lead");

        let updated = repo
            .upsert(
                tenant.id,
                conversation.id,
                LeadUpdate {
                    stage: Some(LeadStage::Hot),
                    objections: Some(vec!["price".to_owned()]),
                    ..LeadUpdate::default()
                },
            )
            .await
            .expect("update lead");

        assert_eq!(created.id, updated.id, "retry must not duplicate the lead");
        assert_eq!(updated.stage, LeadStage::Hot);
        assert_eq!(updated.score, 55);
        assert_eq!(updated.objections, vec!["price".to_owned()]);
    }

    #[tokio::test]
    async fn preferred_plan_from_another_tenant_is_an_isolation_violation() {
        let pool = memory_pool().await;
        let (acme, _) = seed_tenant(&pool, "acme").await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let foreign_plan = seed_plan(&pool, beta.id, "pro", Decimal::new(9900, 2)).await;

        let user = UserRepository::new(pool.clone())
            .get_or_create(acme.id, "u1", None)
            .await
            .expect("user");
        let conversation = ConversationRepository::new(pool.clone())
            .create(acme.id, user.id)
            .await
            .expect("conversation");

        let result = LeadRepository::new(pool)
            .upsert(
                acme.id,
                conversation.id,
                LeadUpdate { preferred_plan_id: Some(foreign_plan.id), ..LeadUpdate::default() },
            )
            .await;
        assert!(result.is_err(), "cross-tenant plan reference must be rejected");
    }

    #[tokio::test]
    async fn leads_are_invisible_across_tenants() {
        let pool = memory_pool().await;
        let (acme, _) = seed_tenant(&pool, "acme").await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let user = UserRepository::new(pool.clone())
            .get_or_create(acme.id, "u1", None)
            .await
            .expect("user");
        let conversation = ConversationRepository::new(pool.clone())
            .create(acme.id, user.id)
            .await
            .expect("conversation");
        let repo = LeadRepository::new(pool);

        repo.upsert(acme.id, conversation.id, LeadUpdate::default()).await.expect("lead");

        let foreign = repo.find_by_conversation(beta.id, conversation.id).await.expect("lookup");
        assert!(foreign.is_none());
    }
}
