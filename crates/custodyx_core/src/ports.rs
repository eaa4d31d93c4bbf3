//! crates/custodyx_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete device storage, relational backend, identity
//! provider and payments provider.

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{AuthEvent, AuthSession};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Failures reported by the identity provider. These are shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("Invalid sign-up details: {0}")]
    InvalidInput(String),
    #[error("Identity provider error: {0}")]
    Provider(String),
}

//=========================================================================================
// Remote Schema
//=========================================================================================

/// The fixed set of tables in the remote relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Subscriptions,
    Reports,
    Documents,
    IncidentTemplates,
    TokenUsage,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Subscriptions => "subscriptions",
            Table::Reports => "reports",
            Table::Documents => "documents",
            Table::IncidentTemplates => "incident_templates",
            Table::TokenUsage => "token_usage",
        }
    }

    /// Every writable column. Adapters must refuse anything outside this list.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Users => &[
                "id", "email", "name", "role", "children", "created_at", "updated_at",
            ],
            Table::Subscriptions => &[
                "id",
                "user_id",
                "tier",
                "stripe_customer_id",
                "stripe_subscription_id",
                "status",
                "current_period_start",
                "current_period_end",
                "created_at",
                "updated_at",
            ],
            Table::Reports => &[
                "id",
                "user_id",
                "content",
                "category",
                "tags",
                "legal_context",
                "images",
                "created_at",
                "updated_at",
            ],
            Table::Documents => &[
                "id",
                "user_id",
                "name",
                "mime_type",
                "data",
                "folder",
                "structured_data",
                "created_at",
                "updated_at",
            ],
            Table::IncidentTemplates => &[
                "id",
                "user_id",
                "title",
                "content",
                "category",
                "tags",
                "legal_context",
                "created_at",
                "updated_at",
            ],
            Table::TokenUsage => &["id", "user_id", "tokens_used", "used_at", "created_at"],
        }
    }

    /// The column holding the owning user's id.
    pub fn owner_column(self) -> &'static str {
        match self {
            Table::Users => "id",
            _ => "user_id",
        }
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::Gte(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn newest_first(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// A select against one table, built the way the hosted backend's query builder reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn order(mut self, order: Option<OrderBy>) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Durable device-local key/value storage (the browser's `localStorage` contract).
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> PortResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> PortResult<()>;
    fn remove_item(&self, key: &str) -> PortResult<()>;
}

/// The remote relational store. Rows travel as JSON objects keyed by column name.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert-or-update every row, resolving conflicts on `on_conflict`.
    async fn upsert(&self, table: Table, rows: Vec<Value>, on_conflict: &str) -> PortResult<()>;

    async fn insert(&self, table: Table, rows: Vec<Value>) -> PortResult<()>;

    async fn select(&self, query: Query) -> PortResult<Vec<Value>>;
}

pub type AuthEventStream = Pin<Box<dyn Stream<Item = AuthEvent> + Send>>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<AuthSession, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// The session persisted on this device, if it is still valid.
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError>;

    /// Extends the current session and emits `TokenRefreshed`.
    async fn refresh_session(&self) -> Result<AuthSession, AuthError>;

    /// Auth-state changes from this point on. Dropping the stream unsubscribes.
    fn subscribe(&self) -> AuthEventStream;
}

/// A hosted checkout page the user is redirected to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[async_trait]
pub trait BillingService: Send + Sync {
    async fn create_checkout_session(
        &self,
        price_id: &str,
        user_id: Uuid,
    ) -> PortResult<CheckoutSession>;

    async fn create_portal_session(&self, customer_id: &str) -> PortResult<PortalSession>;
}
