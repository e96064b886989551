use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use funnelbot_core::domain::user::User;

use super::{is_unique_violation, row_datetime, row_uuid, RepositoryError};
use crate::DbPool;

pub struct UserRepository {
    pool: DbPool,
}

#[derive(Clone, Debug, Default)]
pub struct UserContactUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(
        &self,
        tenant_id: Uuid,
        user_key: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, user_key, name, email, phone, created_at, updated_at
             FROM users WHERE tenant_id = ? AND user_key = ?",
        )
        .bind(tenant_id.to_string())
        .bind(user_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_user(&row)).transpose()
    }

    /// Resolve a user by (tenant, user_key), creating it on first contact.
    /// A supplied name is written through so later, richer identification
    /// wins.
    pub async fn get_or_create(
        &self,
        tenant_id: Uuid,
        user_key: &str,
        name: Option<&str>,
    ) -> Result<User, RepositoryError> {
        if let Some(mut user) = self.find_by_key(tenant_id, user_key).await? {
            if let Some(name) = name {
                if user.name.as_deref() != Some(name) {
                    let now = Utc::now();
                    sqlx::query(
                        "UPDATE users SET name = ?, updated_at = ? WHERE tenant_id = ? AND user_key = ?",
                    )
                    .bind(name)
                    .bind(now.to_rfc3339())
                    .bind(tenant_id.to_string())
                    .bind(user_key)
                    .execute(&self.pool)
                    .await?;
                    user.name = Some(name.to_owned());
                    user.updated_at = now;
                }
            }
            return Ok(user);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO users (id, tenant_id, user_key, name, email, phone, created_at, updated_at)
             VALUES (?, ?, ?, ?, NULL, NULL, ?, ?)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(user_key)
        .bind(name)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                tracing::info!(tenant_id = %tenant_id, user_key = %user_key, "user created");
                Ok(User {
                    id,
                    tenant_id,
                    user_key: user_key.to_owned(),
                    name: name.map(str::to_owned),
                    email: None,
                    phone: None,
                    created_at: now,
                    updated_at: now,
                })
            }
            // Lost a create race: the row exists now, read it back.
            Err(error) if is_unique_violation(&error) => self
                .find_by_key(tenant_id, user_key)
                .await?
                .ok_or_else(|| RepositoryError::not_found("user")),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn update_contact(
        &self,
        tenant_id: Uuid,
        user_key: &str,
        update: UserContactUpdate,
    ) -> Result<User, RepositoryError> {
        let current = self
            .find_by_key(tenant_id, user_key)
            .await?
            .ok_or_else(|| RepositoryError::not_found("user"))?;

        let name = update.name.or(current.name);
        let email = update.email.or(current.email);
        let phone = update.phone.or(current.phone);
        let now = Utc::now();

        sqlx::query(
            "UPDATE users SET name = ?, email = ?, phone = ?, updated_at = ?
             WHERE tenant_id = ? AND user_key = ?",
        )
        .bind(&name)
        .bind(&email)
        .bind(&phone)
        .bind(now.to_rfc3339())
        .bind(tenant_id.to_string())
        .bind(user_key)
        .execute(&self.pool)
        .await?;

        Ok(User { name, email, phone, updated_at: now, ..current })
    }
}

fn decode_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        user_key: sqlx::Row::try_get(row, "user_key")?,
        name: sqlx::Row::try_get(row, "name")?,
        email: sqlx::Row::try_get(row, "email")?,
        phone: sqlx::Row::try_get(row, "phone")?,
        created_at: row_datetime(row, "created_at")?,
        updated_at: row_datetime(row, "updated_at")?,
    })
}
