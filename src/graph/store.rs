//! Storage contract for graph and task-state documents.
//!
//! The engine needs exactly one thing from storage: atomic load and
//! versioned compare-and-replace of whole documents keyed by an opaque id.
//! There is no partial-write visibility; a conflicting replace is retried
//! with a fresh read. The in-process mutation guard is the serialization
//! point the engine depends on; the version check here is the safety net
//! for multi-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub type DocumentId = i64;

#[derive(Debug, Clone)]
pub struct VersionedDocument {
    pub version: u64,
    pub body: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document #{0} not found")]
    NotFound(DocumentId),

    #[error("Document #{0} already exists")]
    AlreadyExists(DocumentId),

    #[error("Version conflict on document #{id}: expected {expected}, found {actual}")]
    Conflict {
        id: DocumentId,
        expected: u64,
        actual: u64,
    },

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable keyed storage for per-context documents.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create(&self, id: DocumentId, body: serde_json::Value) -> Result<(), StoreError>;

    async fn load(&self, id: DocumentId) -> Result<VersionedDocument, StoreError>;

    /// Replace the document iff its current version equals
    /// `expected_version`; otherwise fail with [`StoreError::Conflict`].
    async fn replace(
        &self,
        id: DocumentId,
        body: serde_json::Value,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError>;
}

/// Read-modify-write-replace one typed document, retrying a bounded number
/// of times on version conflict with a fresh read each attempt.
pub async fn modify_document<T, R, F>(
    store: &dyn GraphStore,
    id: DocumentId,
    conflict_retries: u32,
    mut apply: F,
) -> Result<R, crate::error::ConductorError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T) -> Result<R, crate::error::ConductorError>,
{
    let mut attempt = 0;
    loop {
        let doc = store.load(id).await.map_err(crate::error::ConductorError::from)?;
        let mut value: T = serde_json::from_value(doc.body).map_err(StoreError::from)?;
        let out = apply(&mut value)?;
        let body = serde_json::to_value(&value).map_err(StoreError::from)?;
        match store.replace(id, body, doc.version).await {
            Ok(()) => return Ok(out),
            Err(StoreError::Conflict { .. }) if attempt < conflict_retries => {
                attempt += 1;
                tracing::warn!(document_id = id, attempt, "store conflict, re-reading");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// In-memory reference implementation for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    documents: DashMap<DocumentId, VersionedDocument>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn create(&self, id: DocumentId, body: serde_json::Value) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.documents.entry(id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(id)),
            Entry::Vacant(entry) => {
                entry.insert(VersionedDocument { version: 1, body });
                Ok(())
            }
        }
    }

    async fn load(&self, id: DocumentId) -> Result<VersionedDocument, StoreError> {
        self.documents
            .get(&id)
            .map(|d| d.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn replace(
        &self,
        id: DocumentId,
        body: serde_json::Value,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut doc = self.documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if doc.version != expected_version {
            return Err(StoreError::Conflict {
                id,
                expected: expected_version,
                actual: doc.version,
            });
        }
        doc.version += 1;
        doc.body = body;
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        self.documents
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_load_replace() {
        let store = InMemoryGraphStore::new();
        store.create(1, json!({"a": 1})).await.unwrap();
        assert!(matches!(
            store.create(1, json!({})).await,
            Err(StoreError::AlreadyExists(1))
        ));

        let doc = store.load(1).await.unwrap();
        assert_eq!(doc.version, 1);

        store.replace(1, json!({"a": 2}), 1).await.unwrap();
        let doc = store.load(1).await.unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.body["a"], 2);
    }

    #[tokio::test]
    async fn test_replace_conflict() {
        let store = InMemoryGraphStore::new();
        store.create(1, json!({})).await.unwrap();
        store.replace(1, json!({"x": 1}), 1).await.unwrap();
        let err = store.replace(1, json!({"x": 2}), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_modify_document_retries_conflicts() {
        use std::collections::BTreeMap;
        let store = InMemoryGraphStore::new();
        store.create(9, json!({})).await.unwrap();

        // interleave a foreign write by replaying an older version once
        let result: crate::error::Result<u64> =
            modify_document::<BTreeMap<String, u64>, _, _>(&store, 9, 3, |map| {
                map.insert("n".into(), map.get("n").copied().unwrap_or(0) + 1);
                Ok(map["n"])
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }
}
