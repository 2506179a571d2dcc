//! Postgres-backed document store and session table.
//!
//! DESIGN
//! ======
//! One row per canvas. Elements live in a JSONB array and are replaced as a
//! whole on every persist; the row's `revision` guards the replacement so two
//! coordinator instances cannot silently overwrite each other.
//!
//! Stored element arrays are decoded through the element normalizer, so rows
//! written by older clients (string timestamps, upper-case types) still load.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::element::{Element, normalize_all};
use crate::frame::now_ms;
use crate::merge::sorted;
use crate::services::session::{generate_token, hash_token};
use crate::store::{Document, DocumentMeta, DocumentStore, Identity, IdentityVerifier, StoreError};

const META_COLUMNS: &str = "id, name, owner, collaborators, revision, updated_at, last_updated_by, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn meta(&self, id: Uuid) -> Result<DocumentMeta, StoreError> {
        let row = sqlx::query(&format!("SELECT {META_COLUMNS} FROM canvases WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Ok(meta_from_row(&row))
    }
}

fn meta_from_row(row: &sqlx::postgres::PgRow) -> DocumentMeta {
    DocumentMeta {
        id: row.get("id"),
        name: row.get("name"),
        owner: row.get("owner"),
        collaborators: row.get("collaborators"),
        revision: row.get("revision"),
        updated_at: row.get("updated_at"),
        last_updated_by: row.get("last_updated_by"),
        created_at: row.get("created_at"),
    }
}

fn decode_elements(value: serde_json::Value, now: i64) -> Vec<Element> {
    match value {
        serde_json::Value::Array(items) => sorted(normalize_all(&items, now)),
        _ => Vec::new(),
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn load(&self, id: Uuid) -> Result<Document, StoreError> {
        let row = sqlx::query(&format!("SELECT {META_COLUMNS}, elements FROM canvases WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        let meta = meta_from_row(&row);
        let elements = decode_elements(row.get("elements"), meta.created_at);
        Ok(Document { meta, elements })
    }

    async fn authorize(&self, identity: &str, id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT owner = $2 OR $2 = ANY(collaborators) AS allowed FROM canvases WHERE id = $1")
            .bind(id)
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Ok(row.get("allowed"))
    }

    async fn persist(
        &self,
        id: Uuid,
        elements: &[Element],
        updated_by: &str,
        expected_revision: i64,
    ) -> Result<DocumentMeta, StoreError> {
        let payload = serde_json::to_value(elements)?;
        let row = sqlx::query(&format!(
            "UPDATE canvases
             SET elements = $2, revision = revision + 1, updated_at = $3, last_updated_by = $4
             WHERE id = $1 AND revision = $5
             RETURNING {META_COLUMNS}"
        ))
        .bind(id)
        .bind(payload)
        .bind(now_ms())
        .bind(updated_by)
        .bind(expected_revision)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(meta_from_row(&row));
        }
        // Nothing matched: either the row is gone or another writer moved the revision.
        let current = self.meta(id).await?;
        Err(StoreError::Conflict { id, expected: expected_revision, actual: current.revision })
    }

    async fn create(&self, owner: &str, name: &str) -> Result<DocumentMeta, StoreError> {
        let now = now_ms();
        let row = sqlx::query(&format!(
            "INSERT INTO canvases (id, name, owner, collaborators, elements, revision, updated_at, created_at)
             VALUES ($1, $2, $3, '{{}}', '[]'::jsonb, 0, $4, $4)
             RETURNING {META_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(owner)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(meta_from_row(&row))
    }

    async fn share(&self, id: Uuid, owner: &str, collaborator: &str) -> Result<DocumentMeta, StoreError> {
        let meta = self.meta(id).await?;
        if !meta.is_owner(owner) {
            return Err(StoreError::NotOwner);
        }
        if meta.can_access(collaborator) {
            return Ok(meta);
        }
        let row = sqlx::query(&format!(
            "UPDATE canvases SET collaborators = array_append(collaborators, $2)
             WHERE id = $1 AND NOT ($2 = ANY(collaborators))
             RETURNING {META_COLUMNS}"
        ))
        .bind(id)
        .bind(collaborator)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(meta_from_row(&row)),
            None => self.meta(id).await,
        }
    }

    async fn list(&self, identity: &str) -> Result<Vec<DocumentMeta>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {META_COLUMNS} FROM canvases
             WHERE owner = $1 OR $1 = ANY(collaborators)
             ORDER BY updated_at DESC, id ASC"
        ))
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(meta_from_row).collect())
    }

    async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError> {
        let meta = self.meta(id).await?;
        if !meta.is_owner(owner) {
            return Err(StoreError::NotOwner);
        }
        sqlx::query("DELETE FROM canvases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityVerifier for PgStore {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query("SELECT identity FROM sessions WHERE token_hash = $1 AND expires_at > now()")
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("identity")))
    }

    async fn issue(&self, identity: &str) -> Result<String, StoreError> {
        let token = generate_token();
        sqlx::query("INSERT INTO sessions (token_hash, identity) VALUES ($1, $2)")
            .bind(hash_token(&token))
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
