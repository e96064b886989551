use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use funnelbot_core::domain::conversation::{Conversation, ConversationStatus};
use funnelbot_core::domain::lead::{Lead, LeadStage};
use funnelbot_core::domain::message::MessageRole;
use funnelbot_core::funnel::{self, FunnelStage};

use super::lead::{find_by_conversation_in_tx, insert_lead, write_lead_update};
use super::message::append_in_tx;
use super::{row_datetime, row_enum, row_opt_datetime, row_opt_uuid, row_uuid, RepositoryError};
use crate::DbPool;

pub struct ConversationRepository {
    pool: DbPool,
}

/// Result of a handoff: the updated conversation plus the lead that was
/// synthesized or raised for it.
#[derive(Clone, Debug)]
pub struct HandoffOutcome {
    pub conversation: Conversation,
    pub lead: Lead,
    pub lead_created: bool,
}

impl ConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&select_sql("WHERE id = ? AND tenant_id = ?"))
            .bind(conversation_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_conversation(&row)).transpose()
    }

    /// Latest conversation of the user that has not been closed. Handed-off
    /// conversations count as open so follow-up messages hit the blocked
    /// path instead of silently opening a new thread.
    pub async fn find_open_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&select_sql(
            "WHERE tenant_id = ? AND user_id = ? AND status != 'closed'
             ORDER BY created_at DESC LIMIT 1",
        ))
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_conversation(&row)).transpose()
    }

    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, RepositoryError> {
        let owner = sqlx::query("SELECT tenant_id FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found("user"))?;
        let owner_tenant = row_uuid(&owner, "tenant_id")?;
        if owner_tenant != tenant_id {
            return Err(RepositoryError::isolation(format!(
                "user {user_id} does not belong to tenant {tenant_id}"
            )));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO conversations (id, tenant_id, user_id, status, funnel_stage, created_at, updated_at)
             VALUES (?, ?, ?, 'active', 'awareness', ?, ?)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::info!(tenant_id = %tenant_id, conversation_id = %id, "conversation created");

        Ok(Conversation {
            id,
            tenant_id,
            user_id,
            status: ConversationStatus::Active,
            funnel_stage: FunnelStage::Awareness,
            interested_plan_id: None,
            context_summary: None,
            handoff_reason: None,
            handoff_requested_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply stage and status requests. The stage request goes through the
    /// high-water mark, so a backward move is a quiet no-op. Reaching
    /// `closed_won` closes the conversation and promotes its lead to
    /// `converted`.
    pub async fn update_progress(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        status: Option<ConversationStatus>,
        stage: Option<FunnelStage>,
    ) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut conversation = load_in_tx(&mut tx, tenant_id, conversation_id).await?;

        let previous_stage = conversation.funnel_stage;
        if let Some(requested) = stage {
            conversation.funnel_stage = funnel::advance(previous_stage, requested);
        }
        if let Some(status) = status {
            conversation.status = status;
        }

        let won_now = conversation.funnel_stage == FunnelStage::ClosedWon
            && previous_stage != FunnelStage::ClosedWon;
        if won_now {
            conversation.status = ConversationStatus::Closed;
            if let Some(lead) = find_by_conversation_in_tx(&mut tx, tenant_id, conversation_id).await? {
                write_lead_update(
                    &mut tx,
                    lead.id,
                    LeadStage::Converted,
                    100,
                    &lead.objections,
                    lead.preferred_plan_id,
                    lead.next_action.as_deref(),
                )
                .await?;
            }
        }

        conversation.updated_at = Utc::now();
        sqlx::query(
            "UPDATE conversations SET status = ?, funnel_stage = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(conversation.status.as_str())
        .bind(conversation.funnel_stage.as_str())
        .bind(conversation.updated_at.to_rfc3339())
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(conversation)
    }

    pub async fn set_interested_plan(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        plan_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        load_in_tx(&mut tx, tenant_id, conversation_id).await?;
        super::lead::ensure_plan_in_tenant(&mut tx, tenant_id, plan_id).await?;

        sqlx::query(
            "UPDATE conversations SET interested_plan_id = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(plan_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_context_summary(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        summary: &str,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            "UPDATE conversations SET context_summary = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(summary)
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::not_found("conversation"));
        }
        Ok(())
    }

    /// Escalate to a human: flag the conversation, record the reason,
    /// append a system turn, and make sure a lead exists. The funnel stage
    /// is left where it is; the synthesized lead profile derives from it.
    pub async fn request_handoff(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        reason: &str,
        summary: &str,
    ) -> Result<HandoffOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut conversation = load_in_tx(&mut tx, tenant_id, conversation_id).await?;

        let now = Utc::now();
        conversation.status = ConversationStatus::AwaitingHuman;
        conversation.handoff_reason = Some(reason.to_owned());
        conversation.handoff_requested_at = Some(now);
        conversation.context_summary = Some(summary.to_owned());
        conversation.updated_at = now;

        sqlx::query(
            "UPDATE conversations SET status = ?, handoff_reason = ?, handoff_requested_at = ?,
                    context_summary = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(conversation.status.as_str())
        .bind(reason)
        .bind(now.to_rfc3339())
        .bind(summary)
        .bind(now.to_rfc3339())
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

        append_in_tx(
            &mut tx,
            tenant_id,
            conversation_id,
            MessageRole::System,
            &format!("Handoff to a human agent requested.\n\nReason: {reason}\n\nSummary: {summary}"),
            None,
        )
        .await?;

        let profile = funnel::synthesized_lead_profile(conversation.funnel_stage);
        let next_action = format!("Handoff requested: {reason}");
        let existing = find_by_conversation_in_tx(&mut tx, tenant_id, conversation_id).await?;

        let (lead, lead_created) = match existing {
            Some(current) => {
                // Raise, never lower, what the agent already recorded.
                let stage = if profile.stage.rank() > current.stage.rank() {
                    profile.stage
                } else {
                    current.stage
                };
                let score = current.score.max(profile.score);
                let preferred_plan_id =
                    current.preferred_plan_id.or(conversation.interested_plan_id);
                write_lead_update(
                    &mut tx,
                    current.id,
                    stage,
                    score,
                    &current.objections,
                    preferred_plan_id,
                    Some(next_action.as_str()),
                )
                .await?;
                (
                    Lead {
                        stage,
                        score,
                        preferred_plan_id,
                        next_action: Some(next_action),
                        updated_at: now,
                        ..current
                    },
                    false,
                )
            }
            None => {
                let lead = insert_lead(
                    &mut tx,
                    tenant_id,
                    conversation_id,
                    conversation.user_id,
                    profile.stage,
                    profile.score,
                    &[],
                    conversation.interested_plan_id,
                    Some(next_action.as_str()),
                )
                .await?;
                (lead, true)
            }
        };

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            conversation_id = %conversation_id,
            lead_id = %lead.id,
            lead_created = lead_created,
            stage = conversation.funnel_stage.as_str(),
            "handoff requested"
        );

        Ok(HandoffOutcome { conversation, lead, lead_created })
    }
}

fn select_sql(clause: &str) -> String {
    format!(
        "SELECT id, tenant_id, user_id, status, funnel_stage, interested_plan_id,
                context_summary, handoff_reason, handoff_requested_at, created_at, updated_at
         FROM conversations {clause}"
    )
}

async fn load_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    conversation_id: Uuid,
) -> Result<Conversation, RepositoryError> {
    let row = sqlx::query(&select_sql("WHERE id = ? AND tenant_id = ?"))
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| RepositoryError::not_found("conversation"))?;

    decode_conversation(&row)
}

fn decode_conversation(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        user_id: row_uuid(row, "user_id")?,
        status: row_enum(row, "status")?,
        funnel_stage: row_enum(row, "funnel_stage")?,
        interested_plan_id: row_opt_uuid(row, "interested_plan_id")?,
        context_summary: sqlx::Row::try_get(row, "context_summary")?,
        handoff_reason: sqlx::Row::try_get(row, "handoff_reason")?,
        handoff_requested_at: row_opt_datetime(row, "handoff_requested_at")?,
        created_at: row_datetime(row, "created_at")?,
        updated_at: row_datetime(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use funnelbot_core::domain::conversation::ConversationStatus;
    use funnelbot_core::domain::lead::LeadStage;
    use funnelbot_core::funnel::FunnelStage;

    use super::ConversationRepository;
    use crate::fixtures::{memory_pool, seed_tenant};
    use crate::repositories::{LeadRepository, LeadUpdate, MessageRepository, UserRepository};

    async fn setup() -> (crate::DbPool, uuid::Uuid, uuid::Uuid) {
        let pool = memory_pool().await;
        let (tenant, _) = seed_tenant(&pool, "acme").await;
        let user = UserRepository::new(pool.clone())
            .get_or_create(tenant.id, "u1", None)
            .await
            .expect("user");
        (pool, tenant.id, user.id)
    }

    #[tokio::test]
    async fn new_conversation_starts_at_awareness() {
        let (pool, tenant_id, user_id) = setup().await;
        let repo = ConversationRepository::new(pool);

        let conversation = repo.create(tenant_id, user_id).await.expect("create");
        assert_eq!(conversation.funnel_stage, FunnelStage::Awareness);
        assert_eq!(conversation.status, ConversationStatus::Active);

        let open = repo.find_open_for_user(tenant_id, user_id).await.expect("find open");
        assert_eq!(open.map(|c| c.id), Some(conversation.id));
    }

    #[tokio::test]
    async fn stage_updates_are_a_high_water_mark() {
        let (pool, tenant_id, user_id) = setup().await;
        let repo = ConversationRepository::new(pool);
        let conversation = repo.create(tenant_id, user_id).await.expect("create");

        let advanced = repo
            .update_progress(tenant_id, conversation.id, None, Some(FunnelStage::Negotiation))
            .await
            .expect("advance");
        assert_eq!(advanced.funnel_stage, FunnelStage::Negotiation);

        let ignored = repo
            .update_progress(tenant_id, conversation.id, None, Some(FunnelStage::Interest))
            .await
            .expect("backward request");
        assert_eq!(ignored.funnel_stage, FunnelStage::Negotiation);

        let lost = repo
            .update_progress(tenant_id, conversation.id, None, Some(FunnelStage::ClosedLost))
            .await
            .expect("close lost");
        assert_eq!(lost.funnel_stage, FunnelStage::ClosedLost);
    }

    #[tokio::test]
    async fn handoff_at_negotiation_synthesizes_a_hot_lead() {
        let (pool, tenant_id, user_id) = setup().await;
        let repo = ConversationRepository::new(pool.clone());
        let conversation = repo.create(tenant_id, user_id).await.expect("create");

        repo.update_progress(tenant_id, conversation.id, None, Some(FunnelStage::Negotiation))
            .await
            .expect("advance");

        let outcome = repo
            .request_handoff(tenant_id, conversation.id, "ready to close", "wants the pro plan")
            .await
            .expect("handoff");

        assert!(outcome.lead_created);
        assert_eq!(outcome.lead.stage, LeadStage::Hot);
        assert_eq!(outcome.lead.score, 80);
        assert_eq!(outcome.conversation.status, ConversationStatus::AwaitingHuman);
        assert_eq!(outcome.conversation.funnel_stage, FunnelStage::Negotiation);

        let messages = MessageRepository::new(pool)
            .recent(tenant_id, conversation.id, 10)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 1, "handoff should append a system turn");
    }

    #[tokio::test]
    async fn handoff_raises_but_never_lowers_an_existing_lead() {
        let (pool, tenant_id, user_id) = setup().await;
        let repo = ConversationRepository::new(pool.clone());
        let conversation = repo.create(tenant_id, user_id).await.expect("create");

        LeadRepository::new(pool)
            .upsert(
                tenant_id,
                conversation.id,
                LeadUpdate {
                    stage: Some(LeadStage::Qualified),
                    score: Some(95),
                    ..LeadUpdate::default()
                },
            )
            .await
            .expect("existing lead");

        let outcome = repo
            .request_handoff(tenant_id, conversation.id, "complex questions", "summary")
            .await
            .expect("handoff");

        assert!(!outcome.lead_created);
        assert_eq!(outcome.lead.stage, LeadStage::Qualified);
        assert_eq!(outcome.lead.score, 95);
    }

    #[tokio::test]
    async fn closing_won_promotes_the_lead_to_converted() {
        let (pool, tenant_id, user_id) = setup().await;
        let repo = ConversationRepository::new(pool.clone());
        let conversation = repo.create(tenant_id, user_id).await.expect("create");

        repo.update_progress(tenant_id, conversation.id, None, Some(FunnelStage::Negotiation))
            .await
            .expect("advance");
        repo.request_handoff(tenant_id, conversation.id, "ready", "summary")
            .await
            .expect("handoff");

        let closed = repo
            .update_progress(tenant_id, conversation.id, None, Some(FunnelStage::ClosedWon))
            .await
            .expect("close won");
        assert_eq!(closed.status, ConversationStatus::Closed);

        let lead = LeadRepository::new(pool)
            .find_by_conversation(tenant_id, conversation.id)
            .await
            .expect("lookup")
            .expect("lead exists");
        assert_eq!(lead.stage, LeadStage::Converted);
        assert_eq!(lead.score, 100);
    }

    #[tokio::test]
    async fn conversations_are_invisible_across_tenants() {
        let (pool, tenant_id, user_id) = setup().await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let repo = ConversationRepository::new(pool);
        let conversation = repo.create(tenant_id, user_id).await.expect("create");

        let foreign = repo.find(beta.id, conversation.id).await.expect("lookup");
        assert!(foreign.is_none(), "lookup scoped to another tenant must miss");
    }

    #[tokio::test]
    async fn creating_a_conversation_for_a_foreign_user_is_rejected() {
        let (pool, _, user_id) = setup().await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let repo = ConversationRepository::new(pool);

        let result = repo.create(beta.id, user_id).await;
        assert!(result.is_err(), "cross-tenant user reference must be rejected");
    }
}
