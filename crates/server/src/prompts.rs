//! Tenant prompt and knowledge resolution with a TTL cache.
//!
//! The cache is a shared read-through object handed around explicitly, not
//! a process global. Entries are keyed by tenant and resource kind, expire
//! on a short TTL, and are invalidated explicitly when a tenant publishes
//! new content. Stale reads within the TTL are acceptable; cross-tenant
//! reads are impossible because the tenant id is part of the key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use funnelbot_core::domain::prompt::PromptType;
use funnelbot_db::repositories::{PromptRepository, RepositoryError};
use funnelbot_db::DbPool;

const PROMPT_TTL: Duration = Duration::from_secs(600);
const KNOWLEDGE_TTL: Duration = Duration::from_secs(1800);

pub const DEFAULT_KNOWLEDGE_SLUG: &str = "product-knowledge";

const DEFAULT_SALES_PROMPT: &str = "\
You are a friendly, consultative sales assistant. Understand what the \
customer needs, answer questions about the available plans, and move the \
conversation forward through the sales funnel using the tools you are \
given. Record the customer's contact details when they share them, keep \
the conversation summary up to date, and request a handoff to a human \
when the customer is ready to close or asks for something you cannot do. \
Never invent plans or prices; always read them with the plan tools.";

const DEFAULT_ADMIN_PROMPT: &str = "\
You are an operations assistant for the sales team. Answer questions \
about funnel performance, plan performance, objections and recent leads \
using the analytics tools. Report numbers exactly as the tools return \
them and say so when a metric is empty.";

const DEFAULT_ANALYST_PROMPT: &str = "\
You are a sales analyst. Given conversation data and funnel metrics, \
summarize what is working, where leads stall, and what to try next. Be \
specific and ground every claim in the numbers provided.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Prompt,
    Knowledge,
}

type CacheKey = (Uuid, CacheKind, String);

#[derive(Clone)]
pub struct PromptCache {
    entries: Arc<RwLock<HashMap<CacheKey, (String, Instant)>>>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Active system prompt for (tenant, type), falling back to the
    /// built-in default template when the tenant has none.
    pub async fn system_prompt(
        &self,
        pool: &DbPool,
        tenant_id: Uuid,
        prompt_type: PromptType,
    ) -> Result<String, RepositoryError> {
        let key = (tenant_id, CacheKind::Prompt, prompt_type.as_str().to_owned());
        if let Some(cached) = self.fresh(&key, PROMPT_TTL).await {
            return Ok(cached);
        }

        let content = match PromptRepository::new(pool.clone()).active(tenant_id, prompt_type).await? {
            Some(template) => template.system_prompt,
            None => default_prompt(prompt_type).to_owned(),
        };

        self.store(key, content.clone()).await;
        Ok(content)
    }

    /// Knowledge document content by slug, empty when absent.
    pub async fn knowledge(
        &self,
        pool: &DbPool,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let key = (tenant_id, CacheKind::Knowledge, slug.to_owned());
        if let Some(cached) = self.fresh(&key, KNOWLEDGE_TTL).await {
            return Ok((!cached.is_empty()).then_some(cached));
        }

        let content = PromptRepository::new(pool.clone())
            .find_document(tenant_id, slug)
            .await?
            .map(|document| document.content);

        // Misses are cached as empty strings so absent documents do not
        // hit the database on every message.
        self.store(key, content.clone().unwrap_or_default()).await;
        Ok(content)
    }

    /// Drop every cached entry of one kind for a tenant. Called when the
    /// tenant publishes a new prompt or document.
    pub async fn invalidate(&self, tenant_id: Uuid, kind: CacheKind) {
        let mut entries = self.entries.write().await;
        entries.retain(|(entry_tenant, entry_kind, _), _| {
            *entry_tenant != tenant_id || *entry_kind != kind
        });
    }

    async fn fresh(&self, key: &CacheKey, ttl: Duration) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(_, stored_at)| stored_at.elapsed() < ttl)
            .map(|(content, _)| content.clone())
    }

    async fn store(&self, key: CacheKey, content: String) {
        let mut entries = self.entries.write().await;
        entries.insert(key, (content, Instant::now()));
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_prompt(prompt_type: PromptType) -> &'static str {
    match prompt_type {
        PromptType::SalesAgent => DEFAULT_SALES_PROMPT,
        PromptType::AdminAgent => DEFAULT_ADMIN_PROMPT,
        PromptType::AnalystAgent => DEFAULT_ANALYST_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use funnelbot_core::domain::prompt::{DocumentType, PromptType};
    use funnelbot_db::fixtures::{memory_pool, seed_tenant};
    use funnelbot_db::repositories::{NewKnowledgeDocument, PromptRepository};

    use super::{CacheKind, PromptCache};

    #[tokio::test]
    async fn falls_back_to_default_template_without_a_published_prompt() {
        let pool = memory_pool().await;
        let (tenant, _) = seed_tenant(&pool, "acme").await;
        let cache = PromptCache::new();

        let prompt = cache
            .system_prompt(&pool, tenant.id, PromptType::SalesAgent)
            .await
            .expect("prompt");
        assert!(prompt.contains("sales assistant"));
    }

    #[tokio::test]
    async fn serves_cached_content_until_invalidated() {
        let pool = memory_pool().await;
        let (tenant, _) = seed_tenant(&pool, "acme").await;
        let repo = PromptRepository::new(pool.clone());
        let cache = PromptCache::new();

        repo.publish(tenant.id, PromptType::SalesAgent, "v1 prompt", None, None)
            .await
            .expect("publish v1");
        let first = cache
            .system_prompt(&pool, tenant.id, PromptType::SalesAgent)
            .await
            .expect("prompt");
        assert_eq!(first, "v1 prompt");

        repo.publish(tenant.id, PromptType::SalesAgent, "v2 prompt", None, None)
            .await
            .expect("publish v2");

        let stale = cache
            .system_prompt(&pool, tenant.id, PromptType::SalesAgent)
            .await
            .expect("prompt");
        assert_eq!(stale, "v1 prompt", "within the TTL the cache may serve v1");

        cache.invalidate(tenant.id, CacheKind::Prompt).await;
        let refreshed = cache
            .system_prompt(&pool, tenant.id, PromptType::SalesAgent)
            .await
            .expect("prompt");
        assert_eq!(refreshed, "v2 prompt");
    }

    #[tokio::test]
    async fn cache_entries_never_cross_tenants() {
        let pool = memory_pool().await;
        let (acme, _) = seed_tenant(&pool, "acme").await;
        let (beta, _) = seed_tenant(&pool, "beta").await;
        let repo = PromptRepository::new(pool.clone());
        let cache = PromptCache::new();

        repo.publish(acme.id, PromptType::SalesAgent, "acme prompt", None, None)
            .await
            .expect("publish");

        let acme_prompt = cache
            .system_prompt(&pool, acme.id, PromptType::SalesAgent)
            .await
            .expect("prompt");
        assert_eq!(acme_prompt, "acme prompt");

        let beta_prompt = cache
            .system_prompt(&pool, beta.id, PromptType::SalesAgent)
            .await
            .expect("prompt");
        assert_ne!(beta_prompt, "acme prompt");
    }

    #[tokio::test]
    async fn knowledge_lookup_returns_document_content() {
        let pool = memory_pool().await;
        let (tenant, _) = seed_tenant(&pool, "acme").await;
        PromptRepository::new(pool.clone())
            .create_document(
                tenant.id,
                NewKnowledgeDocument {
                    title: "Product knowledge".to_owned(),
                    slug: "product-knowledge".to_owned(),
                    content: "# Plans overview".to_owned(),
                    document_type: DocumentType::Product,
                },
            )
            .await
            .expect("document");
        let cache = PromptCache::new();

        let knowledge = cache
            .knowledge(&pool, tenant.id, "product-knowledge")
            .await
            .expect("knowledge");
        assert_eq!(knowledge.as_deref(), Some("# Plans overview"));

        let missing = cache.knowledge(&pool, tenant.id, "absent").await.expect("lookup");
        assert!(missing.is_none());
    }
}
