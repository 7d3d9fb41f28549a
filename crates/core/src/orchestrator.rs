use crate::catalog::IndexCatalog;
use crate::chunking::{chunk_stats, Chunker};
use crate::embeddings::Embedder;
use crate::error::{EmbedderError, RetrievalError};
use crate::models::{IngestionReport, MultiRetrieval, RetrievalResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Wires chunking, the injected embedder and the shared catalog together.
pub struct RetrievalCoordinator {
    chunker: Chunker,
    catalog: Arc<IndexCatalog>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalCoordinator {
    pub fn new(chunker: Chunker, catalog: Arc<IndexCatalog>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunker,
            catalog,
            embedder,
        }
    }

    pub fn catalog(&self) -> &Arc<IndexCatalog> {
        &self.catalog
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Chunks, embeds and registers a new document.
    ///
    /// The catalog write runs on a blocking worker, so it completes even if
    /// the caller stops polling this future.
    pub async fn ingest(
        &self,
        document_id: &str,
        raw_text: &str,
    ) -> Result<IngestionReport, RetrievalError> {
        crate::catalog::validate_document_id(document_id)?;
        if self.catalog.contains(document_id) {
            return Err(RetrievalError::AlreadyExists(document_id.to_string()));
        }

        let chunks = self.chunker.chunk(raw_text, document_id);
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyDocument(document_id.to_string()));
        }
        let stats = chunk_stats(&chunks);

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(EmbedderError::CountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let catalog = Arc::clone(&self.catalog);
        let owned_id = document_id.to_string();
        let info =
            tokio::task::spawn_blocking(move || catalog.add_document(&owned_id, chunks, vectors))
                .await??;

        info!(
            document_id,
            chunks = stats.total_chunks,
            avg_chunk_size = stats.avg_chunk_size,
            "ingested document"
        );

        Ok(IngestionReport {
            document_id: info.document_id,
            stats,
            dimension: info.dimension,
        })
    }

    /// Top-k passages of one document. An unknown id is an error, never an
    /// empty result.
    pub async fn retrieve(
        &self,
        document_id: &str,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        self.retrieve_with(document_id, query_text, top_k, false).await
    }

    pub async fn retrieve_with(
        &self,
        document_id: &str,
        query_text: &str,
        top_k: usize,
        include_vectors: bool,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let handle = self.catalog.get(document_id)?;
        let query_vector = self.embed_query(query_text).await?;
        handle.search_with(&query_vector, top_k, include_vectors)
    }

    /// Comparison query across documents.
    ///
    /// Every document contributes up to `top_k` hits of its own before the
    /// merge, so a document with weaker scores is still represented. The
    /// merged list is ordered by similarity and re-ranked 1..N; equal scores
    /// keep the order of `document_ids`. Unknown ids are reported back instead
    /// of failing the call, and a repeated id is searched once.
    pub async fn retrieve_many(
        &self,
        document_ids: &[String],
        query_text: &str,
        top_k: usize,
    ) -> Result<MultiRetrieval, RetrievalError> {
        self.retrieve_many_with(document_ids, query_text, top_k, false)
            .await
    }

    pub async fn retrieve_many_with(
        &self,
        document_ids: &[String],
        query_text: &str,
        top_k: usize,
        include_vectors: bool,
    ) -> Result<MultiRetrieval, RetrievalError> {
        let mut seen = HashSet::new();
        let mut handles = Vec::new();
        let mut missing_document_ids = Vec::new();

        for document_id in document_ids {
            if !seen.insert(document_id.as_str()) {
                continue;
            }
            match self.catalog.get(document_id) {
                Ok(handle) => handles.push(handle),
                Err(RetrievalError::NotFound(_)) => {
                    warn!(document_id = %document_id, "skipping unknown document in comparison query");
                    missing_document_ids.push(document_id.clone());
                }
                Err(error) => return Err(error),
            }
        }

        if handles.is_empty() {
            return Ok(MultiRetrieval {
                results: Vec::new(),
                missing_document_ids,
            });
        }

        let query_vector = self.embed_query(query_text).await?;
        let mut results = Vec::new();

        for handle in &handles {
            match handle.search_with(&query_vector, top_k, include_vectors) {
                Ok(hits) => results.extend(hits),
                // Deleted between lookup and search.
                Err(RetrievalError::NotFound(document_id)) => {
                    warn!(document_id = %document_id, "document disappeared during comparison query");
                    missing_document_ids.push(document_id);
                }
                Err(error) => return Err(error),
            }
        }

        merge_ranked(&mut results);

        Ok(MultiRetrieval {
            results,
            missing_document_ids,
        })
    }

    async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>, RetrievalError> {
        if query_text.trim().is_empty() {
            return Err(RetrievalError::InvalidArgument("query is empty".to_string()));
        }

        let mut vectors = self
            .embedder
            .embed_batch(&[query_text.to_string()])
            .await?;
        if vectors.len() != 1 {
            return Err(EmbedderError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            }
            .into());
        }
        Ok(vectors.remove(0))
    }
}

/// Stable sort by descending similarity followed by dense re-ranking.
fn merge_ranked(results: &mut [RetrievalResult]) {
    results.sort_by(|left, right| right.similarity_score.total_cmp(&left.similarity_score));
    for (position, result) in results.iter_mut().enumerate() {
        result.rank = position + 1;
    }
}
