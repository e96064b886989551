//! Tenant-scoped analytics reads.
//!
//! Funnel counts are taken from each conversation's *current* stage within
//! the creation window; there is no stage-transition log, so conversations
//! that advanced past a stage are not counted at it retroactively.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use funnelbot_core::domain::conversation::ConversationStatus;
use funnelbot_core::domain::lead::LeadStage;
use funnelbot_core::funnel::{self, ConversionRate, FunnelStage};

use super::{
    row_datetime, row_enum, row_json, row_uuid, RepositoryError,
};
use crate::DbPool;

pub struct AnalyticsRepository {
    pool: DbPool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FunnelMetrics {
    pub period: Period,
    pub stages: BTreeMap<String, i64>,
    pub conversion_rates: Vec<ConversionRate>,
    pub total_conversations: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationDigest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ConversationStatus,
    pub context_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ObjectionCount {
    pub objection: String,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ObjectionReport {
    pub total_leads_with_objections: i64,
    pub objections: Vec<ObjectionCount>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlanPerformance {
    pub plan_name: String,
    pub plan_slug: String,
    pub interest_count: i64,
    pub conversion_count: i64,
    pub conversion_rate: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadDigestKind {
    Lead,
    QualifiedConversation,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// One row of the recent-leads view: an explicit lead, or an
/// awaiting-human conversation that never got one, rendered with a
/// synthesized stage and score.
#[derive(Clone, Debug, Serialize)]
pub struct LeadDigest {
    pub kind: LeadDigestKind,
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub stage: LeadStage,
    pub score: i32,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub contact: ContactInfo,
    pub objections: Vec<String>,
    pub handoff_reason: Option<String>,
}

impl AnalyticsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn funnel_metrics(
        &self,
        tenant_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<FunnelMetrics, RepositoryError> {
        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - Duration::days(30));

        let rows = sqlx::query(
            "SELECT funnel_stage, COUNT(*) AS count
             FROM conversations
             WHERE tenant_id = ? AND created_at >= ? AND created_at <= ?
             GROUP BY funnel_stage",
        )
        .bind(tenant_id.to_string())
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut counts: HashMap<FunnelStage, i64> = HashMap::new();
        for row in &rows {
            let stage: FunnelStage = row_enum(row, "funnel_stage")?;
            counts.insert(stage, row.try_get::<i64, _>("count")?);
        }

        let total_conversations = counts.values().sum();
        let conversion_rates = funnel::conversion_rates(&counts);
        let stages = counts
            .into_iter()
            .map(|(stage, count)| (stage.as_str().to_owned(), count))
            .collect();

        Ok(FunnelMetrics { period: Period { start, end }, stages, conversion_rates, total_conversations })
    }

    pub async fn conversations_by_stage(
        &self,
        tenant_id: Uuid,
        stage: FunnelStage,
        limit: u32,
    ) -> Result<Vec<ConversationDigest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, status, context_summary, created_at
             FROM conversations
             WHERE tenant_id = ? AND funnel_stage = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(stage.as_str())
        .bind(i64::from(limit.clamp(1, 100)))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ConversationDigest {
                    id: row_uuid(row, "id")?,
                    user_id: row_uuid(row, "user_id")?,
                    status: row_enum(row, "status")?,
                    context_summary: row.try_get("context_summary")?,
                    created_at: row_datetime(row, "created_at")?,
                })
            })
            .collect()
    }

    pub async fn common_objections(
        &self,
        tenant_id: Uuid,
    ) -> Result<ObjectionReport, RepositoryError> {
        let rows = sqlx::query(
            "SELECT objections FROM leads WHERE tenant_id = ? AND objections != '[]'",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let total_leads_with_objections = rows.len() as i64;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in &rows {
            let objections: Vec<String> = row_json(row, "objections")?;
            for objection in objections {
                *counts.entry(objection).or_insert(0) += 1;
            }
        }

        let mut objections: Vec<ObjectionCount> = counts
            .into_iter()
            .map(|(objection, count)| ObjectionCount { objection, count })
            .collect();
        objections.sort_by(|a, b| b.count.cmp(&a.count).then(a.objection.cmp(&b.objection)));
        objections.truncate(10);

        Ok(ObjectionReport { total_leads_with_objections, objections })
    }

    pub async fn plan_performance(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<PlanPerformance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT p.name, p.slug,
                    (SELECT COUNT(*) FROM conversations c
                     WHERE c.tenant_id = p.tenant_id AND c.interested_plan_id = p.id)
                        AS interest_count,
                    (SELECT COUNT(*) FROM conversations c
                     WHERE c.tenant_id = p.tenant_id AND c.interested_plan_id = p.id
                       AND c.funnel_stage = 'closed_won')
                        AS conversion_count
             FROM plans p
             WHERE p.tenant_id = ? AND p.is_active = 1
             ORDER BY p.name",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let interest_count: i64 = row.try_get("interest_count")?;
                let conversion_count: i64 = row.try_get("conversion_count")?;
                let conversion_rate = if interest_count > 0 {
                    (conversion_count as f64 / interest_count as f64 * 10_000.0).round() / 100.0
                } else {
                    0.0
                };
                Ok(PlanPerformance {
                    plan_name: row.try_get("name")?,
                    plan_slug: row.try_get("slug")?,
                    interest_count,
                    conversion_count,
                    conversion_rate,
                })
            })
            .collect()
    }

    /// Recent leads, merging explicit leads with awaiting-human
    /// conversations that have none. The explicit lead wins whenever both
    /// exist for a conversation.
    pub async fn recent_leads(
        &self,
        tenant_id: Uuid,
        limit: u32,
    ) -> Result<Vec<LeadDigest>, RepositoryError> {
        let limit = limit.clamp(1, 50) as usize;
        let fetch_limit = (limit * 2) as i64;

        let lead_rows = sqlx::query(
            "SELECT l.id, l.conversation_id, l.stage, l.score, l.objections, l.next_action,
                    l.created_at, u.name, u.email, u.phone, c.handoff_reason
             FROM leads l
             JOIN users u ON u.id = l.user_id AND u.tenant_id = l.tenant_id
             JOIN conversations c ON c.id = l.conversation_id AND c.tenant_id = l.tenant_id
             WHERE l.tenant_id = ?
             ORDER BY l.created_at DESC LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(fetch_limit)
        .fetch_all(&self.pool)
        .await?;

        let mut digests: Vec<LeadDigest> = Vec::with_capacity(lead_rows.len());
        for row in &lead_rows {
            digests.push(LeadDigest {
                kind: LeadDigestKind::Lead,
                id: row_uuid(row, "id")?,
                conversation_id: row_uuid(row, "conversation_id")?,
                stage: row_enum(row, "stage")?,
                score: row.try_get::<i64, _>("score")? as i32,
                description: row
                    .try_get::<Option<String>, _>("next_action")?
                    .unwrap_or_else(|| "No description available".to_owned()),
                created_at: row_datetime(row, "created_at")?,
                contact: ContactInfo {
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    phone: row.try_get("phone")?,
                },
                objections: row_json(row, "objections")?,
                handoff_reason: row.try_get("handoff_reason")?,
            });
        }

        let qualified_rows = sqlx::query(
            "SELECT c.id, c.funnel_stage, c.context_summary, c.handoff_reason, c.created_at,
                    u.name, u.email, u.phone
             FROM conversations c
             JOIN users u ON u.id = c.user_id AND u.tenant_id = c.tenant_id
             LEFT JOIN leads l ON l.conversation_id = c.id AND l.tenant_id = c.tenant_id
             WHERE c.tenant_id = ? AND c.status = 'awaiting_human' AND l.id IS NULL
             ORDER BY c.created_at DESC LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(fetch_limit)
        .fetch_all(&self.pool)
        .await?;

        for row in &qualified_rows {
            let stage: FunnelStage = row_enum(row, "funnel_stage")?;
            let profile = funnel::synthesized_lead_profile(stage);
            let conversation_id = row_uuid(row, "id")?;
            let context_summary: Option<String> = row.try_get("context_summary")?;
            let handoff_reason: Option<String> = row.try_get("handoff_reason")?;
            let description = context_summary
                .or_else(|| handoff_reason.clone())
                .unwrap_or_else(|| "Qualified conversation awaiting a human".to_owned());

            digests.push(LeadDigest {
                kind: LeadDigestKind::QualifiedConversation,
                id: conversation_id,
                conversation_id,
                stage: profile.stage,
                score: profile.score,
                description,
                created_at: row_datetime(row, "created_at")?,
                contact: ContactInfo {
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    phone: row.try_get("phone")?,
                },
                objections: Vec::new(),
                handoff_reason,
            });
        }

        digests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        digests.truncate(limit);
        Ok(digests)
    }
}
