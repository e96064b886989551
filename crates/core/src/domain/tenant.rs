use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, UnknownEnumValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Trial,
    Suspended,
    Cancelled,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trial => "trial",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only active and trial tenants may authenticate.
    pub fn can_authenticate(&self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }
}

impl FromStr for TenantStatus {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "trial" => Ok(Self::Trial),
            "suspended" => Ok(Self::Suspended),
            "cancelled" => Ok(Self::Cancelled),
            other => {
                Err(UnknownEnumValue { kind: "tenant status", value: other.to_owned() })
            }
        }
    }
}

/// Typed rendition of the per-tenant configuration blob. Every field has a
/// default; unknown keys in stored JSON are ignored so older rows keep
/// deserializing as the shape grows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub funnel_config: FunnelLabels,
    #[serde(default)]
    pub llm: TenantLlmOverrides,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            business_type: None,
            currency: default_currency(),
            features: FeatureFlags::default(),
            funnel_config: FunnelLabels::default(),
            llm: TenantLlmOverrides::default(),
        }
    }
}

fn default_currency() -> String {
    "USD".to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub enable_handoff: bool,
    #[serde(default = "default_true")]
    pub enable_analytics: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { enable_handoff: true, enable_analytics: true }
    }
}

fn default_true() -> bool {
    true
}

/// Display labels for funnel stages. Labels only: the stage ordering in
/// [`crate::funnel`] is fixed and not tenant-configurable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelLabels {
    #[serde(default)]
    pub stages: Vec<FunnelStageLabel>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStageLabel {
    pub key: String,
    pub name: String,
}

/// Per-tenant LLM preferences overriding the process-wide defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantLlmOverrides {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// A tenant record as seen outside the directory. The API key hash never
/// leaves the storage layer; only the display prefix is carried here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub config: TenantConfig,
    pub api_key_prefix: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Slugs are lowercase alphanumerics and dashes, immutable after
    /// creation.
    pub fn validate_slug(slug: &str) -> Result<(), DomainError> {
        if slug.is_empty() {
            return Err(DomainError::Validation("tenant slug must not be empty".to_owned()));
        }
        if !slug.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-')) {
            return Err(DomainError::Validation(format!(
                "tenant slug `{slug}` must match ^[a-z0-9-]+$"
            )));
        }
        Ok(())
    }
}
