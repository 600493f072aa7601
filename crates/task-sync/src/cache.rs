//! Local projection of the remote task folders.
//!
//! Only the operation that owns a document's queue slot writes its entry.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::document::{DocId, Document};

#[derive(Default)]
pub struct TodoCache {
    documents: RwLock<HashMap<DocId, Document>>,
}

impl TodoCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DocId, Document>> {
        self.documents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DocId, Document>> {
        self.documents.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &DocId) -> Option<Document> {
        self.read().get(id).cloned()
    }

    pub fn insert(&self, document: Document) {
        self.write().insert(document.id.clone(), document);
    }

    pub fn remove(&self, id: &DocId) -> Option<Document> {
        self.write().remove(id)
    }

    pub fn by_path(&self, path: &str) -> Option<Document> {
        self.read().values().find(|d| d.path == path).cloned()
    }

    /// All documents, active ones first, then by path.
    pub fn snapshot(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.read().values().cloned().collect();
        documents.sort_by(|a, b| {
            a.is_archived()
                .cmp(&b.is_archived())
                .then_with(|| a.path.cmp(&b.path))
        });
        documents
    }

    /// Keep only the documents for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&Document) -> bool) {
        self.write().retain(|_, document| keep(document));
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
