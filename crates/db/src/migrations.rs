use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "tenants",
        "users",
        "plans",
        "conversations",
        "messages",
        "leads",
        "prompt_templates",
        "knowledge_documents",
        "uq_users_tenant_user_key",
        "uq_plans_tenant_slug",
        "uq_messages_conversation_seq",
        "uq_prompt_templates_tenant_type_version",
        "uq_knowledge_documents_tenant_slug",
        "idx_conversations_tenant_user",
        "idx_conversations_tenant_status",
        "idx_conversations_tenant_stage",
        "idx_messages_tenant_conversation",
        "idx_leads_tenant_stage",
        "idx_leads_tenant_conversation",
        "idx_prompt_templates_tenant_type_active",
        "idx_knowledge_documents_tenant_type",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("check table")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in
            ["tenants", "users", "plans", "conversations", "messages", "leads", "prompt_templates", "knowledge_documents"]
        {
            assert_eq!(table_count(&pool, table).await, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn per_tenant_uniqueness_is_compound_not_global() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let unique_indexes = sqlx::query(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND name IN
             ('uq_users_tenant_user_key', 'uq_plans_tenant_slug',
              'uq_prompt_templates_tenant_type_version', 'uq_knowledge_documents_tenant_slug')",
        )
        .fetch_all(&pool)
        .await
        .expect("load unique indexes");

        assert_eq!(unique_indexes.len(), 4);
        for row in unique_indexes {
            let sql = row.get::<String, _>("sql");
            assert!(sql.contains("tenant_id"), "unique index must include tenant_id: {sql}");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "tenants").await, 0);
        assert_eq!(table_count(&pool, "conversations").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
