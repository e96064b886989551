use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::UnknownEnumValue;
use crate::funnel::FunnelStage;

/// Conversation status. `AwaitingHuman` is a handoff flag orthogonal to
/// the funnel stage; a negotiation-stage conversation can be awaiting a
/// human at the same time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    AwaitingHuman,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingHuman => "awaiting_human",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "awaiting_human" => Ok(Self::AwaitingHuman),
            "closed" => Ok(Self::Closed),
            other => {
                Err(UnknownEnumValue { kind: "conversation status", value: other.to_owned() })
            }
        }
    }
}

/// One continuous dialogue between a user and the agent layer. Belongs to
/// exactly one tenant and one user of that same tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub status: ConversationStatus,
    pub funnel_stage: FunnelStage,
    pub interested_plan_id: Option<Uuid>,
    pub context_summary: Option<String>,
    pub handoff_reason: Option<String>,
    pub handoff_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
