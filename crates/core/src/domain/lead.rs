use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::UnknownEnumValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStage {
    Cold,
    Warm,
    Hot,
    Qualified,
    Converted,
}

impl LeadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Hot => "hot",
            Self::Qualified => "qualified",
            Self::Converted => "converted",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Cold => 0,
            Self::Warm => 1,
            Self::Hot => 2,
            Self::Qualified => 3,
            Self::Converted => 4,
        }
    }
}

impl FromStr for LeadStage {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cold" => Ok(Self::Cold),
            "warm" => Ok(Self::Warm),
            "hot" => Ok(Self::Hot),
            "qualified" => Ok(Self::Qualified),
            "converted" => Ok(Self::Converted),
            other => Err(UnknownEnumValue { kind: "lead stage", value: other.to_owned() }),
        }
    }
}

/// A qualified sales opportunity attached to a conversation, either
/// created explicitly by the agent or synthesized on handoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub stage: LeadStage,
    pub score: i32,
    pub objections: Vec<String>,
    pub preferred_plan_id: Option<Uuid>,
    pub next_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
