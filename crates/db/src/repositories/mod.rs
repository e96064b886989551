//! Tenant-scoped repositories.
//!
//! Every accessor on a tenant-partitioned entity takes the resolved
//! `tenant_id` as a mandatory parameter and includes it in the query
//! predicate. Inserts take the tenant from that parameter, never from
//! caller-supplied payload. A lookup that misses because the row belongs
//! to another tenant is indistinguishable from a plain miss.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;
use uuid::Uuid;

use funnelbot_core::errors::{DomainError, UnknownEnumValue};

pub mod analytics;
pub mod conversation;
pub mod lead;
pub mod message;
pub mod plan;
pub mod prompt;
pub mod tenant;
pub mod user;

pub use analytics::AnalyticsRepository;
pub use conversation::{ConversationRepository, HandoffOutcome};
pub use lead::{LeadRepository, LeadUpdate};
pub use message::MessageRepository;
pub use plan::{NewPlan, PlanRepository};
pub use prompt::{NewKnowledgeDocument, PromptRepository};
pub use tenant::{TenantRepository, TenantUpdate, VerifyError};
pub use user::{UserContactUpdate, UserRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str) -> Self {
        Self::Domain(DomainError::NotFound(entity))
    }

    pub(crate) fn isolation(detail: impl Into<String>) -> Self {
        Self::Domain(DomainError::IsolationViolation(detail.into()))
    }
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed")
    )
}

pub(crate) fn row_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, RepositoryError> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw)
        .map_err(|_| RepositoryError::Decode(format!("column `{column}` is not a uuid: `{raw}`")))
}

pub(crate) fn row_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, RepositoryError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        Uuid::parse_str(&value).map_err(|_| {
            RepositoryError::Decode(format!("column `{column}` is not a uuid: `{value}`"))
        })
    })
    .transpose()
}

pub(crate) fn row_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = row.try_get(column)?;
    parse_datetime(column, &raw)
}

pub(crate) fn row_opt_datetime(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| parse_datetime(column, &value)).transpose()
}

fn parse_datetime(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw).map(|value| value.with_timezone(&Utc)).map_err(|_| {
        RepositoryError::Decode(format!("column `{column}` is not an rfc3339 timestamp: `{raw}`"))
    })
}

pub(crate) fn row_enum<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: FromStr<Err = UnknownEnumValue>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|err| RepositoryError::Decode(err.to_string()))
}

pub(crate) fn row_json<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: DeserializeOwned,
{
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw)
        .map_err(|err| RepositoryError::Decode(format!("column `{column}` is not valid json: {err}")))
}

pub(crate) fn row_opt_json(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<serde_json::Value>, RepositoryError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        serde_json::from_str(&value).map_err(|err| {
            RepositoryError::Decode(format!("column `{column}` is not valid json: {err}"))
        })
    })
    .transpose()
}

pub(crate) fn row_bool(row: &SqliteRow, column: &str) -> Result<bool, RepositoryError> {
    let raw: i64 = row.try_get(column)?;
    Ok(raw != 0)
}
