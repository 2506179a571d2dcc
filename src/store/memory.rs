//! In-process document store and token table.
//!
//! Used by tests and by `main` when no `DATABASE_URL` is configured. Data
//! lives only as long as the process. `set_unavailable` makes every write
//! fail so persistence-failure paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::element::Element;
use crate::frame::now_ms;
use crate::merge::sorted;
use crate::services::session::{generate_token, hash_token};
use crate::store::{Document, DocumentMeta, DocumentStore, Identity, IdentityVerifier, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    /// token hash -> identity
    sessions: RwLock<HashMap<String, Identity>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Register a fixed token, e.g. from development configuration.
    pub async fn register_token(&self, token: &str, identity: &str) {
        self.sessions
            .write()
            .await
            .insert(hash_token(token), identity.to_owned());
    }

    /// Insert a document with explicit collaborators and elements.
    pub async fn seed(&self, owner: &str, collaborators: &[&str], elements: Vec<Element>) -> Uuid {
        let id = Uuid::new_v4();
        let now = now_ms();
        let meta = DocumentMeta {
            id,
            name: String::new(),
            owner: owner.to_owned(),
            collaborators: collaborators.iter().map(|c| (*c).to_owned()).collect(),
            revision: 0,
            updated_at: now,
            last_updated_by: None,
            created_at: now,
        };
        self.documents
            .write()
            .await
            .insert(id, Document { meta, elements: sorted(elements) });
        id
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, id: Uuid) -> Result<Document, StoreError> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn authorize(&self, identity: &str, id: Uuid) -> Result<bool, StoreError> {
        let documents = self.documents.read().await;
        let doc = documents.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(doc.meta.can_access(identity))
    }

    async fn persist(
        &self,
        id: Uuid,
        elements: &[Element],
        updated_by: &str,
        expected_revision: i64,
    ) -> Result<DocumentMeta, StoreError> {
        self.check_available()?;
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if doc.meta.revision != expected_revision {
            return Err(StoreError::Conflict { id, expected: expected_revision, actual: doc.meta.revision });
        }
        doc.elements = elements.to_vec();
        doc.meta.revision += 1;
        doc.meta.updated_at = now_ms();
        doc.meta.last_updated_by = Some(updated_by.to_owned());
        Ok(doc.meta.clone())
    }

    async fn create(&self, owner: &str, name: &str) -> Result<DocumentMeta, StoreError> {
        self.check_available()?;
        let id = self.seed(owner, &[], Vec::new()).await;
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        doc.meta.name = name.to_owned();
        Ok(doc.meta.clone())
    }

    async fn share(&self, id: Uuid, owner: &str, collaborator: &str) -> Result<DocumentMeta, StoreError> {
        self.check_available()?;
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !doc.meta.is_owner(owner) {
            return Err(StoreError::NotOwner);
        }
        if !doc.meta.can_access(collaborator) {
            doc.meta.collaborators.push(collaborator.to_owned());
        }
        Ok(doc.meta.clone())
    }

    async fn list(&self, identity: &str) -> Result<Vec<DocumentMeta>, StoreError> {
        let documents = self.documents.read().await;
        let mut metas: Vec<DocumentMeta> = documents
            .values()
            .filter(|doc| doc.meta.can_access(identity))
            .map(|doc| doc.meta.clone())
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(metas)
    }

    async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut documents = self.documents.write().await;
        let doc = documents.get(&id).ok_or(StoreError::NotFound(id))?;
        if !doc.meta.is_owner(owner) {
            return Err(StoreError::NotOwner);
        }
        documents.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl IdentityVerifier for MemoryStore {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.sessions.read().await.get(&hash_token(token)).cloned())
    }

    async fn issue(&self, identity: &str) -> Result<String, StoreError> {
        let token = generate_token();
        self.register_token(&token, identity).await;
        Ok(token)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
