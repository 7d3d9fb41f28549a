use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub char_count: usize,
    pub word_count: usize,
}

impl Chunk {
    pub fn new(document_id: impl Into<String>, index: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            document_id: document_id.into(),
            index,
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            text,
        }
    }

    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            index: self.index,
            text: self.text.clone(),
            char_count: self.char_count,
            word_count: self.word_count,
        }
    }

    pub fn from_record(document_id: &str, record: ChunkRecord) -> Self {
        Self {
            document_id: document_id.to_string(),
            index: record.index,
            text: record.text,
            char_count: record.char_count,
            word_count: record.word_count,
        }
    }
}

/// On-disk shape of a chunk. The owning document id is the file stem, and
/// embeddings live in the separate vector buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: usize,
    pub text: String,
    pub char_count: usize,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub similarity_score: f64,
    pub squared_distance: f32,
    pub rank: usize,
    pub source_document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiRetrieval {
    pub results: Vec<RetrievalResult>,
    pub missing_document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk: Chunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub chunk_count: usize,
    pub dimension: usize,
    pub durable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub avg_chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub total_characters: usize,
    pub avg_words_per_chunk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub document_id: String,
    pub stats: ChunkStats,
    pub dimension: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub top_k: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 100,
            top_k: 5,
        }
    }
}
