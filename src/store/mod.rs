//! Document store and identity verification seams.
//!
//! ARCHITECTURE
//! ============
//! The coordinator never talks to a database directly. It goes through two
//! traits: `DocumentStore` (load, authorize, persist, create, share) and
//! `IdentityVerifier` (bearer token to identity). `memory` backs tests and
//! single-process development; `postgres` backs deployments.
//!
//! CONCURRENCY
//! ===========
//! Each document carries a `revision`. `persist` takes the revision the
//! caller merged against and fails with `StoreError::Conflict` when another
//! writer got there first; the caller reloads, re-merges and retries.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::element::Element;
use crate::frame::ErrorCode;

/// Authenticated principal. Opaque to the coordinator.
pub type Identity = String;

// =============================================================================
// TYPES
// =============================================================================

/// Everything about a canvas except its elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub id: Uuid,
    pub name: String,
    pub owner: Identity,
    pub collaborators: Vec<Identity>,
    pub revision: i64,
    /// Epoch milliseconds of the last persisted update.
    pub updated_at: i64,
    pub last_updated_by: Option<Identity>,
    pub created_at: i64,
}

impl DocumentMeta {
    /// The access predicate: owner or listed collaborator.
    #[must_use]
    pub fn can_access(&self, identity: &str) -> bool {
        self.owner == identity || self.collaborators.iter().any(|c| c == identity)
    }

    #[must_use]
    pub fn is_owner(&self, identity: &str) -> bool {
        self.owner == identity
    }
}

/// A canvas with its authoritative element collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub meta: DocumentMeta,
    pub elements: Vec<Element>,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(Uuid),
    #[error("revision conflict on {id}: expected {expected}, found {actual}")]
    Conflict { id: Uuid, expected: i64, actual: i64 },
    #[error("only the owner may do that")]
    NotOwner,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored elements are malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_DOCUMENT_NOT_FOUND",
            Self::Conflict { .. } => "E_CONFLICT",
            Self::NotOwner => "E_ACCESS_DENIED",
            Self::Unavailable(_) | Self::Database(_) | Self::Decode(_) => "E_PERSISTENCE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_) | Self::Database(_))
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Opaque document persistence. Operations are atomic per document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document and its elements.
    async fn load(&self, id: Uuid) -> Result<Document, StoreError>;

    /// Whether `identity` may read and write `id`. Missing documents are `NotFound`.
    async fn authorize(&self, identity: &str, id: Uuid) -> Result<bool, StoreError>;

    /// Replace the element collection if the stored revision still equals
    /// `expected_revision`. Returns the updated metadata.
    async fn persist(
        &self,
        id: Uuid,
        elements: &[Element],
        updated_by: &str,
        expected_revision: i64,
    ) -> Result<DocumentMeta, StoreError>;

    /// Create an empty canvas owned by `owner`.
    async fn create(&self, owner: &str, name: &str) -> Result<DocumentMeta, StoreError>;

    /// Add `collaborator` to the canvas. Only the owner may share.
    async fn share(&self, id: Uuid, owner: &str, collaborator: &str) -> Result<DocumentMeta, StoreError>;

    /// Canvases `identity` owns or collaborates on, newest first.
    async fn list(&self, identity: &str) -> Result<Vec<DocumentMeta>, StoreError>;

    /// Delete the canvas. Only the owner may delete.
    async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError>;
}

/// Bearer token to identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, StoreError>;

    /// Mint a session token for `identity`.
    async fn issue(&self, identity: &str) -> Result<String, StoreError>;
}
