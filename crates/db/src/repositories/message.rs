use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use funnelbot_core::domain::message::{Message, MessageRole};

use super::{row_datetime, row_enum, row_opt_json, row_uuid, RepositoryError};
use crate::DbPool;

pub struct MessageRepository {
    pool: DbPool,
}

impl MessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one turn. The sequence number is allocated inside the
    /// transaction, so concurrent appends to the same conversation settle
    /// into one total order; the unique (conversation, seq) index is the
    /// guard if two writers ever race past the read.
    pub async fn append(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        tool_calls: Option<serde_json::Value>,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_conversation_in_tenant(&mut tx, tenant_id, conversation_id).await?;
        let message =
            append_in_tx(&mut tx, tenant_id, conversation_id, role, content, tool_calls).await?;
        tx.commit().await?;
        Ok(message)
    }

    /// Most recent turns in chronological order.
    pub async fn recent(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let limit = i64::from(limit.clamp(1, 100));
        let rows = sqlx::query(
            "SELECT id, tenant_id, conversation_id, seq, role, content, tool_calls, created_at
             FROM messages
             WHERE tenant_id = ? AND conversation_id = ?
             ORDER BY seq DESC LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(conversation_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages =
            rows.iter().map(decode_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

pub(crate) async fn ensure_conversation_in_tenant(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    conversation_id: Uuid,
) -> Result<(), RepositoryError> {
    let found = sqlx::query("SELECT 1 FROM conversations WHERE id = ? AND tenant_id = ?")
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

    if found.is_none() {
        return Err(RepositoryError::not_found("conversation"));
    }
    Ok(())
}

pub(crate) async fn append_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    conversation_id: Uuid,
    role: MessageRole,
    content: &str,
    tool_calls: Option<serde_json::Value>,
) -> Result<Message, RepositoryError> {
    let seq: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?",
    )
    .bind(conversation_id.to_string())
    .fetch_one(&mut **tx)
    .await?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let tool_calls_json = tool_calls
        .as_ref()
        .map(|value| {
            serde_json::to_string(value)
                .map_err(|err| RepositoryError::Decode(format!("tool_calls encode: {err}")))
        })
        .transpose()?;

    sqlx::query(
        "INSERT INTO messages (id, tenant_id, conversation_id, seq, role, content, tool_calls, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(conversation_id.to_string())
    .bind(seq)
    .bind(role.as_str())
    .bind(content)
    .bind(&tool_calls_json)
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(Message {
        id,
        tenant_id,
        conversation_id,
        seq,
        role,
        content: content.to_owned(),
        tool_calls,
        created_at: now,
    })
}

fn decode_message(row: &SqliteRow) -> Result<Message, RepositoryError> {
    Ok(Message {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        conversation_id: row_uuid(row, "conversation_id")?,
        seq: sqlx::Row::try_get(row, "seq")?,
        role: row_enum(row, "role")?,
        content: sqlx::Row::try_get(row, "content")?,
        tool_calls: row_opt_json(row, "tool_calls")?,
        created_at: row_datetime(row, "created_at")?,
    })
}
