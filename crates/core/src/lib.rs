pub mod auth;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod funnel;

pub use auth::is_admin_name;
pub use credentials::{hash_api_key, issue_api_key, verify_api_key, IssuedKey};
pub use domain::conversation::{Conversation, ConversationStatus};
pub use domain::lead::{Lead, LeadStage};
pub use domain::message::{Message, MessageRole};
pub use domain::plan::{BillingCycle, Plan};
pub use domain::prompt::{DocumentType, KnowledgeDocument, PromptTemplate, PromptType};
pub use domain::tenant::{Tenant, TenantConfig, TenantStatus};
pub use domain::user::User;
pub use errors::{AuthError, DomainError, UnknownEnumValue};
pub use funnel::FunnelStage;
