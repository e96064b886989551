use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::UnknownEnumValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    SalesAgent,
    AdminAgent,
    AnalystAgent,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SalesAgent => "sales_agent",
            Self::AdminAgent => "admin_agent",
            Self::AnalystAgent => "analyst_agent",
        }
    }
}

impl FromStr for PromptType {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sales_agent" => Ok(Self::SalesAgent),
            "admin_agent" => Ok(Self::AdminAgent),
            "analyst_agent" => Ok(Self::AnalystAgent),
            other => Err(UnknownEnumValue { kind: "prompt type", value: other.to_owned() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Product,
    Faq,
    Objections,
    Scripts,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Faq => "faq",
            Self::Objections => "objections",
            Self::Scripts => "scripts",
        }
    }
}

impl FromStr for DocumentType {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "product" => Ok(Self::Product),
            "faq" => Ok(Self::Faq),
            "objections" => Ok(Self::Objections),
            "scripts" => Ok(Self::Scripts),
            other => Err(UnknownEnumValue { kind: "document type", value: other.to_owned() }),
        }
    }
}

/// Versioned system prompt. At most one active version exists per
/// (tenant, prompt type); publishing a new version deactivates the rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub prompt_type: PromptType,
    pub version: i64,
    pub is_active: bool,
    pub system_prompt: String,
    pub knowledge_base: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub document_type: DocumentType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
