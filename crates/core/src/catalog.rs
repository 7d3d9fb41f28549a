//! The authoritative set of per-document indexes.
//!
//! Membership lives behind one narrow lock that is only held for map lookups
//! and inserts. Each index sits behind its own reader/writer lock, so a
//! mutation of one document never waits on searches of another.

use crate::error::RetrievalError;
use crate::models::{Chunk, DocumentInfo, RetrievalResult, StoredChunk};
use crate::store::IndexStore;
use crate::vector_index::VectorIndex;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct IndexSlot {
    index: VectorIndex,
    durable: bool,
    retired: bool,
}

/// Shared access to one document's index.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    document_id: String,
    slot: Arc<RwLock<IndexSlot>>,
}

impl IndexHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        self.search_with(query_vector, top_k, false)
    }

    pub fn search_with(
        &self,
        query_vector: &[f32],
        top_k: usize,
        include_vectors: bool,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let slot = self.slot.read();
        if slot.retired {
            return Err(RetrievalError::NotFound(self.document_id.clone()));
        }
        slot.index.search_with(query_vector, top_k, include_vectors)
    }

    pub fn info(&self) -> Result<DocumentInfo, RetrievalError> {
        let slot = self.slot.read();
        if slot.retired {
            return Err(RetrievalError::NotFound(self.document_id.clone()));
        }
        Ok(DocumentInfo {
            document_id: self.document_id.clone(),
            chunk_count: slot.index.len(),
            dimension: slot.index.dimension(),
            durable: slot.durable,
        })
    }

    pub fn chunks(&self, include_vectors: bool) -> Result<Vec<StoredChunk>, RetrievalError> {
        let slot = self.slot.read();
        if slot.retired {
            return Err(RetrievalError::NotFound(self.document_id.clone()));
        }
        Ok(slot
            .index
            .chunks()
            .iter()
            .enumerate()
            .map(|(position, chunk)| StoredChunk {
                chunk: chunk.clone(),
                embedding: include_vectors
                    .then(|| slot.index.vector(position).map(<[f32]>::to_vec))
                    .flatten(),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub document_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedDocument>,
}

#[derive(Debug)]
pub struct IndexCatalog {
    store: IndexStore,
    members: RwLock<HashMap<String, Arc<RwLock<IndexSlot>>>>,
}

impl IndexCatalog {
    /// Opens the persistence directory without loading anything; call
    /// [`IndexCatalog::load_all`] once at startup.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        Ok(Self {
            store: IndexStore::open(root.as_ref())?,
            members: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Reads every persisted pair. A document whose pair is incomplete or
    /// unreadable is skipped with a warning and the scan carries on.
    pub fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();

        for document_id in self.store.document_ids() {
            match self.store.load(&document_id) {
                Ok(index) => {
                    let slot = IndexSlot {
                        index,
                        durable: true,
                        retired: false,
                    };
                    self.members
                        .write()
                        .insert(document_id.clone(), Arc::new(RwLock::new(slot)));
                    report.loaded.push(document_id);
                }
                Err(error) => {
                    warn!(document_id = %document_id, error = %error, "skipping persisted index");
                    report.skipped.push(SkippedDocument {
                        document_id,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            root = %self.store.root().display(),
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "loaded persisted indexes"
        );
        report
    }

    pub fn get(&self, document_id: &str) -> Result<IndexHandle, RetrievalError> {
        self.members
            .read()
            .get(document_id)
            .map(|slot| IndexHandle {
                document_id: document_id.to_string(),
                slot: Arc::clone(slot),
            })
            .ok_or_else(|| RetrievalError::NotFound(document_id.to_string()))
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.members.read().contains_key(document_id)
    }

    pub fn list_document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.members.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn search(
        &self,
        document_id: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let results = self.get(document_id)?.search(query_vector, top_k)?;
        debug!(document_id, top_k, hits = results.len(), "searched index");
        Ok(results)
    }

    pub fn info(&self, document_id: &str) -> Result<DocumentInfo, RetrievalError> {
        self.get(document_id)?.info()
    }

    pub fn chunks(
        &self,
        document_id: &str,
        include_vectors: bool,
    ) -> Result<Vec<StoredChunk>, RetrievalError> {
        self.get(document_id)?.chunks(include_vectors)
    }

    /// Creates and persists the index for a new document.
    ///
    /// The index is registered before it is written, under its own write lock,
    /// so searches on the id wait for the write while other ids are unaffected.
    /// When the write fails the index stays searchable but is reported as not
    /// durable, and the error is returned.
    pub fn add_document(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<DocumentInfo, RetrievalError> {
        validate_document_id(document_id)?;

        if chunks.is_empty() {
            return Err(RetrievalError::EmptyDocument(document_id.to_string()));
        }
        let dimension = vectors
            .first()
            .map(Vec::len)
            .ok_or(RetrievalError::DimensionMismatch {
                subject: "vector count",
                expected: chunks.len(),
                actual: 0,
            })?;
        let mut index = VectorIndex::new(document_id, dimension)?;
        index.add(chunks, &vectors)?;

        let slot = Arc::new(RwLock::new(IndexSlot {
            index,
            durable: false,
            retired: false,
        }));
        let mut guard = slot.write();

        {
            let mut members = self.members.write();
            if members.contains_key(document_id) {
                return Err(RetrievalError::AlreadyExists(document_id.to_string()));
            }
            members.insert(document_id.to_string(), Arc::clone(&slot));
        }

        let saved = self.store.save(&guard.index);
        guard.durable = saved.is_ok();
        let info = DocumentInfo {
            document_id: document_id.to_string(),
            chunk_count: guard.index.len(),
            dimension,
            durable: guard.durable,
        };
        drop(guard);

        match saved {
            Ok(()) => {
                info!(document_id, chunks = info.chunk_count, dimension, "added document");
                Ok(info)
            }
            Err(error) => {
                warn!(document_id, error = %error, "document kept in memory but not persisted");
                Err(error.into())
            }
        }
    }

    /// Retries the durable write of an index that failed to persist.
    pub fn persist_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        let handle = self.get(document_id)?;
        let mut slot = handle.slot.write();
        if slot.retired {
            return Err(RetrievalError::NotFound(document_id.to_string()));
        }
        self.store.save(&slot.index)?;
        slot.durable = true;
        Ok(())
    }

    /// Removes the document from memory and disk. Returns `false` when the id
    /// was not loaded.
    pub fn delete_document(&self, document_id: &str) -> Result<bool, RetrievalError> {
        let Some(slot) = self.members.read().get(document_id).cloned() else {
            return Ok(false);
        };

        // Waits for in-flight searches and writes on this id only.
        let mut guard = slot.write();
        if guard.retired {
            return Ok(false);
        }

        let removed = self.store.remove(document_id);
        guard.retired = true;
        drop(guard);

        {
            let mut members = self.members.write();
            if members
                .get(document_id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                members.remove(document_id);
            }
        }

        match removed {
            Ok(_) => {
                info!(document_id, "deleted document");
                Ok(true)
            }
            Err(error) => {
                warn!(document_id, error = %error, "document dropped from memory but files remain");
                Err(RetrievalError::Persistence(error))
            }
        }
    }
}

/// Document ids become file stems, so they are restricted to a portable set.
pub fn validate_document_id(document_id: &str) -> Result<(), RetrievalError> {
    let valid = !document_id.is_empty()
        && !document_id.starts_with('.')
        && document_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RetrievalError::InvalidArgument(format!(
            "document id {document_id:?} must be non-empty ASCII alphanumerics, '-', '_' or '.', not starting with '.'"
        )))
    }
}
