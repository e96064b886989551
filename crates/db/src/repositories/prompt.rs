use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use funnelbot_core::domain::prompt::{DocumentType, KnowledgeDocument, PromptTemplate, PromptType};
use funnelbot_core::errors::DomainError;

use super::{is_unique_violation, row_bool, row_datetime, row_enum, row_uuid, RepositoryError};
use crate::DbPool;

pub struct PromptRepository {
    pool: DbPool,
}

#[derive(Clone, Debug)]
pub struct NewKnowledgeDocument {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub document_type: DocumentType,
}

impl PromptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The single active version for (tenant, type), if any.
    pub async fn active(
        &self,
        tenant_id: Uuid,
        prompt_type: PromptType,
    ) -> Result<Option<PromptTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, prompt_type, version, is_active, system_prompt,
                    knowledge_base, created_by, created_at
             FROM prompt_templates
             WHERE tenant_id = ? AND prompt_type = ? AND is_active = 1
             ORDER BY version DESC LIMIT 1",
        )
        .bind(tenant_id.to_string())
        .bind(prompt_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_template(&row)).transpose()
    }

    /// Publish a new version and deactivate every previous one, keeping
    /// the single-active-version invariant inside one transaction.
    pub async fn publish(
        &self,
        tenant_id: Uuid,
        prompt_type: PromptType,
        system_prompt: &str,
        knowledge_base: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<PromptTemplate, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let max_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM prompt_templates
             WHERE tenant_id = ? AND prompt_type = ?",
        )
        .bind(tenant_id.to_string())
        .bind(prompt_type.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE prompt_templates SET is_active = 0 WHERE tenant_id = ? AND prompt_type = ?",
        )
        .bind(tenant_id.to_string())
        .bind(prompt_type.as_str())
        .execute(&mut *tx)
        .await?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let version = max_version + 1;
        sqlx::query(
            "INSERT INTO prompt_templates (id, tenant_id, prompt_type, version, is_active,
                                           system_prompt, knowledge_base, created_by, created_at)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(prompt_type.as_str())
        .bind(version)
        .bind(system_prompt)
        .bind(knowledge_base)
        .bind(created_by)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            prompt_type = prompt_type.as_str(),
            version = version,
            "prompt template published"
        );

        Ok(PromptTemplate {
            id,
            tenant_id,
            prompt_type,
            version,
            is_active: true,
            system_prompt: system_prompt.to_owned(),
            knowledge_base: knowledge_base.map(str::to_owned),
            created_by: created_by.map(str::to_owned),
            created_at: now,
        })
    }

    pub async fn list_active(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<PromptTemplate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, prompt_type, version, is_active, system_prompt,
                    knowledge_base, created_by, created_at
             FROM prompt_templates
             WHERE tenant_id = ? AND is_active = 1
             ORDER BY prompt_type, version DESC",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_template).collect()
    }

    pub async fn create_document(
        &self,
        tenant_id: Uuid,
        document: NewKnowledgeDocument,
    ) -> Result<KnowledgeDocument, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let inserted = sqlx::query(
            "INSERT INTO knowledge_documents (id, tenant_id, title, slug, content, document_type,
                                              is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(&document.title)
        .bind(&document.slug)
        .bind(&document.content)
        .bind(document.document_type.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                return Err(DomainError::Conflict {
                    entity: "knowledge document",
                    value: document.slug,
                }
                .into());
            }
            Err(error) => return Err(error.into()),
        }

        Ok(KnowledgeDocument {
            id,
            tenant_id,
            title: document.title,
            slug: document.slug,
            content: document.content,
            document_type: document.document_type,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_document(
        &self,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<KnowledgeDocument>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, title, slug, content, document_type, is_active,
                    created_at, updated_at
             FROM knowledge_documents
             WHERE tenant_id = ? AND slug = ? AND is_active = 1",
        )
        .bind(tenant_id.to_string())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_document(&row)).transpose()
    }

    pub async fn list_documents(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<KnowledgeDocument>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, title, slug, content, document_type, is_active,
                    created_at, updated_at
             FROM knowledge_documents
             WHERE tenant_id = ? AND is_active = 1
             ORDER BY document_type, slug",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_document).collect()
    }
}

fn decode_template(row: &SqliteRow) -> Result<PromptTemplate, RepositoryError> {
    Ok(PromptTemplate {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        prompt_type: row_enum(row, "prompt_type")?,
        version: sqlx::Row::try_get(row, "version")?,
        is_active: row_bool(row, "is_active")?,
        system_prompt: sqlx::Row::try_get(row, "system_prompt")?,
        knowledge_base: sqlx::Row::try_get(row, "knowledge_base")?,
        created_by: sqlx::Row::try_get(row, "created_by")?,
        created_at: row_datetime(row, "created_at")?,
    })
}

fn decode_document(row: &SqliteRow) -> Result<KnowledgeDocument, RepositoryError> {
    Ok(KnowledgeDocument {
        id: row_uuid(row, "id")?,
        tenant_id: row_uuid(row, "tenant_id")?,
        title: sqlx::Row::try_get(row, "title")?,
        slug: sqlx::Row::try_get(row, "slug")?,
        content: sqlx::Row::try_get(row, "content")?,
        document_type: row_enum(row, "document_type")?,
        is_active: row_bool(row, "is_active")?,
        created_at: row_datetime(row, "created_at")?,
        updated_at: row_datetime(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use funnelbot_core::domain::prompt::{DocumentType, PromptType};

    use super::{NewKnowledgeDocument, PromptRepository};
    use crate::fixtures::{memory_pool, seed_tenant};

    #[tokio::test]
    async fn publishing_keeps_exactly_one_active_version() {
        let pool = memory_pool().await;
        let (tenant, _) = seed_tenant(&pool, "acme").await;
        let repo = PromptRepository::new(pool);

        let v1 = repo
            .publish(tenant.id, PromptType::SalesAgent, "You sell desks.", None, Some("ops"))
            .await
            .expect("publish v1");
        assert_eq!(v1.version, 1);

        let v2 = repo
            .publish(tenant.id, PromptType::SalesAgent, "You sell offices.", None, Some("ops"))
            .await
            .expect("publish v2");
        assert_eq!(v2.version, 2);

        let active = repo
            .active(tenant.id, PromptType::SalesAgent)
            .await
            .expect("lookup")
            .expect("active prompt");
        assert_eq!(active.version, 2);
        assert_eq!(active.system_prompt, "You sell offices.");

        let all_active = repo.list_active(tenant.id).await.expect("list");
        assert_eq!(all_active.len(), 1, "only one active version per type");
    }

    #[tokio::test]
    async fn prompts_are_scoped_by_tenant() {
        let pool = memory_pool().await;
        let (acme, _) = seed_tenant(&pool, "acme").await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let repo = PromptRepository::new(pool);

        repo.publish(acme.id, PromptType::SalesAgent, "acme prompt", None, None)
            .await
            .expect("publish");

        let foreign = repo.active(beta.id, PromptType::SalesAgent).await.expect("lookup");
        assert!(foreign.is_none());
    }

    #[tokio::test]
    async fn knowledge_document_slugs_collide_only_within_a_tenant() {
        let pool = memory_pool().await;
        let (acme, _) = seed_tenant(&pool, "acme").await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let repo = PromptRepository::new(pool);

        let doc = NewKnowledgeDocument {
            title: "Product knowledge".to_owned(),
            slug: "product-knowledge".to_owned(),
            content: "# Desks".to_owned(),
            document_type: DocumentType::Product,
        };

        repo.create_document(acme.id, doc.clone()).await.expect("acme doc");
        repo.create_document(beta.id, doc.clone()).await.expect("beta doc");

        let duplicate = repo.create_document(acme.id, doc).await;
        assert!(duplicate.is_err(), "same slug twice in one tenant must conflict");
    }
}
