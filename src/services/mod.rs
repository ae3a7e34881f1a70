//! Domain collaborators the HTTP handlers call into.
//!
//! Only the interfaces matter to the service shell. The in-memory
//! implementations in [`memory`] keep the binary self-contained; a deployment
//! backed by a database swaps them for its own.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::HandlerError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Login {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecord {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Per-symbol aggregate over a user's records.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SymbolSummary {
    pub symbol: String,
    pub records: usize,
    pub average_price: f64,
    pub total_volume: u64,
    pub latest_price: f64,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid credentials")]
    BadCredentials,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<ServiceError> for HandlerError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Invalid(msg) => Self::BadRequest(msg),
            ServiceError::Conflict(what) => Self::Conflict(format!("{what} already exists")),
            ServiceError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            ServiceError::BadCredentials => Self::Unauthorized,
            ServiceError::Backend(e) => Self::Internal(e),
        }
    }
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn register(&self, registration: Registration) -> Result<User, ServiceError>;

    /// Returns the user whose credentials match.
    async fn login(&self, login: Login) -> Result<User, ServiceError>;

    async fn profile(&self, id: Uuid) -> Result<User, ServiceError>;
}

#[async_trait]
pub trait FinancialService: Send + Sync {
    async fn list(&self, user_id: Uuid) -> Result<Vec<FinancialRecord>, ServiceError>;

    async fn create(&self, user_id: Uuid, record: NewRecord) -> Result<FinancialRecord, ServiceError>;

    async fn analytics(&self, user_id: Uuid) -> Result<Vec<SymbolSummary>, ServiceError>;
}
