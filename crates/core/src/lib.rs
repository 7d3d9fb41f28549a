pub mod catalog;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod vector_index;

pub use catalog::{validate_document_id, IndexCatalog, IndexHandle, LoadReport, SkippedDocument};
pub use chunking::{chunk_stats, chunk_text, normalize_text, Chunker, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{EmbedderError, PersistenceError, RetrievalError};
pub use models::{
    Chunk, ChunkRecord, ChunkStats, DocumentInfo, IngestionOptions, IngestionReport,
    MultiRetrieval, RetrievalResult, StoredChunk,
};
pub use orchestrator::RetrievalCoordinator;
pub use store::IndexStore;
pub use vector_index::{similarity, VectorIndex};
