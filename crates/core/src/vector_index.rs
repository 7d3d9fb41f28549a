//! Exact nearest-neighbour index over the chunk embeddings of one document.
//!
//! Vectors are kept in one flat row-major buffer parallel to the chunk list,
//! so the chunk for a hit is always found by position.
//!
//! # Buffer format
//!
//! - magic bytes `PIDX`
//! - format version, `u32` little-endian
//! - dimension, `u32` little-endian
//! - vector count, `u64` little-endian
//! - `count * dimension` values, `f32` little-endian

use crate::error::{PersistenceError, RetrievalError};
use crate::models::{Chunk, RetrievalResult};
use std::cmp::Ordering;
use std::io::{ErrorKind, Read, Write};

const MAGIC_BYTES: &[u8; 4] = b"PIDX";

const FORMAT_VERSION: u32 = 1;

const HEADER_SIZE: usize = 20;

const BYTES_PER_F32: usize = 4;

#[derive(Debug, Clone)]
pub struct VectorIndex {
    document_id: String,
    dimension: usize,
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    pub fn new(document_id: impl Into<String>, dimension: usize) -> Result<Self, RetrievalError> {
        if dimension == 0 {
            return Err(RetrievalError::InvalidArgument(
                "index dimension must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            document_id: document_id.into(),
            dimension,
            vectors: Vec::new(),
            chunks: Vec::new(),
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Appends chunks with their vectors. Everything is validated before the
    /// first append, so a rejected call leaves the index as it was.
    pub fn add(&mut self, chunks: Vec<Chunk>, vectors: &[Vec<f32>]) -> Result<(), RetrievalError> {
        if chunks.len() != vectors.len() {
            return Err(RetrievalError::DimensionMismatch {
                subject: "vector count",
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }

        if let Some(vector) = vectors.iter().find(|vector| vector.len() != self.dimension) {
            return Err(RetrievalError::DimensionMismatch {
                subject: "embedding dimension",
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        if let Some(chunk) = chunks
            .iter()
            .find(|chunk| chunk.document_id != self.document_id)
        {
            return Err(RetrievalError::InvalidArgument(format!(
                "chunk of document {} cannot be added to index {}",
                chunk.document_id, self.document_id
            )));
        }

        self.vectors.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        self.chunks.extend(chunks);
        Ok(())
    }

    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        self.search_with(query_vector, top_k, false)
    }

    /// Exhaustive squared-L2 search. Ties keep the lower stored position first.
    /// With `include_vectors` each result carries a copy of its stored vector.
    pub fn search_with(
        &self,
        query_vector: &[f32],
        top_k: usize,
        include_vectors: bool,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query_vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                subject: "query vector dimension",
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .map(|stored| squared_l2(query_vector, stored))
            .enumerate()
            .collect();

        let k = top_k.min(scored.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (position, distance))| RetrievalResult {
                chunk: self.chunks[position].clone(),
                similarity_score: similarity(distance),
                squared_distance: distance,
                rank: rank + 1,
                source_document_id: self.document_id.clone(),
                embedding: include_vectors
                    .then(|| self.vector(position).map(<[f32]>::to_vec))
                    .flatten(),
            })
            .collect())
    }

    pub fn serialize<W: Write>(&self, sink: &mut W) -> Result<(), PersistenceError> {
        let dimension = u32::try_from(self.dimension).map_err(|_| {
            PersistenceError::Corrupt(format!("dimension {} does not fit the format", self.dimension))
        })?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.vectors.len() * BYTES_PER_F32);
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&dimension.to_le_bytes());
        bytes.extend_from_slice(&(self.chunks.len() as u64).to_le_bytes());
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        sink.write_all(&bytes)?;
        sink.flush()?;
        Ok(())
    }

    /// Rebuilds an index from a vector buffer and its separately stored chunks.
    /// The buffer must hold exactly one vector per chunk.
    pub fn deserialize<R: Read>(
        document_id: impl Into<String>,
        source: &mut R,
        chunks: Vec<Chunk>,
    ) -> Result<Self, PersistenceError> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_or_corrupt(source, &mut header, "header")?;

        if &header[0..4] != MAGIC_BYTES {
            return Err(PersistenceError::Corrupt("bad magic bytes".to_string()));
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(PersistenceError::Corrupt(format!(
                "unsupported format version {version}, expected {FORMAT_VERSION}"
            )));
        }

        let dimension = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if dimension == 0 {
            return Err(PersistenceError::Corrupt("zero dimension".to_string()));
        }

        let count = u64::from_le_bytes([
            header[12], header[13], header[14], header[15], header[16], header[17], header[18],
            header[19],
        ]);
        if count != chunks.len() as u64 {
            return Err(PersistenceError::Corrupt(format!(
                "buffer holds {count} vectors but {} chunks were stored",
                chunks.len()
            )));
        }

        let payload_len = chunks
            .len()
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(BYTES_PER_F32))
            .ok_or_else(|| PersistenceError::Corrupt("payload size overflows".to_string()))?;

        let mut payload = vec![0u8; payload_len];
        read_exact_or_corrupt(source, &mut payload, "vector payload")?;

        let mut trailing = [0u8; 1];
        if source.read(&mut trailing)? != 0 {
            return Err(PersistenceError::Corrupt("trailing bytes after payload".to_string()));
        }

        let vectors = payload
            .chunks_exact(BYTES_PER_F32)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();

        Ok(Self {
            document_id: document_id.into(),
            dimension,
            vectors,
            chunks,
        })
    }
}

fn read_exact_or_corrupt<R: Read>(
    source: &mut R,
    buffer: &mut [u8],
    section: &str,
) -> Result<(), PersistenceError> {
    source.read_exact(buffer).map_err(|error| {
        if error.kind() == ErrorKind::UnexpectedEof {
            PersistenceError::Corrupt(format!("truncated {section}"))
        } else {
            PersistenceError::Io(error)
        }
    })
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}

fn by_distance(left: &(usize, f32), right: &(usize, f32)) -> Ordering {
    left.1.total_cmp(&right.1).then(left.0.cmp(&right.0))
}

/// Maps a squared distance onto (0, 1]; identical vectors score 1.
pub fn similarity(squared_distance: f32) -> f64 {
    1.0 / (1.0 + f64::from(squared_distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn chunks(document_id: &str, count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|index| Chunk::new(document_id, index, format!("chunk number {index}.")))
            .collect()
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(VectorIndex::new("doc-1", 0).is_err());
    }

    #[test]
    fn rejected_adds_leave_the_index_untouched() {
        let mut index = VectorIndex::new("doc-1", 2).unwrap();

        let count_mismatch = index.add(chunks("doc-1", 2), &[vec![0.0, 1.0]]);
        assert!(matches!(
            count_mismatch,
            Err(RetrievalError::DimensionMismatch {
                subject: "vector count",
                ..
            })
        ));

        let dimension_mismatch = index.add(chunks("doc-1", 2), &[vec![0.0, 1.0], vec![1.0]]);
        assert!(matches!(
            dimension_mismatch,
            Err(RetrievalError::DimensionMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));

        assert!(index.add(chunks("doc-2", 1), &[vec![0.0, 1.0]]).is_err());
        assert!(index.is_empty());
        assert_eq!(index.vectors.len(), 0);
    }

    #[test]
    fn vectors_and_chunks_stay_paired_across_adds() {
        let mut index = VectorIndex::new("doc-1", 3).unwrap();
        for batch in 1..=4 {
            let vectors = vec![vec![batch as f32; 3]; batch];
            index.add(chunks("doc-1", batch), &vectors).unwrap();
            assert_eq!(index.vectors.len(), index.len() * index.dimension());
        }
        assert_eq!(index.len(), 10);
        assert_eq!(index.vector(9), Some(&[4.0f32, 4.0, 4.0][..]));
        assert_eq!(index.vector(10), None);
    }

    #[test]
    fn results_are_ranked_by_distance() {
        let mut index = VectorIndex::new("doc-1", 3).unwrap();
        index
            .add(
                chunks("doc-1", 3),
                &[vec![1.0, 1.0, 1.0], vec![0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]],
            )
            .unwrap();

        let results = index.search(&[0.0, 0.0, 0.0], 3).unwrap();

        assert_eq!(
            results.iter().map(|hit| hit.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            results.iter().map(|hit| hit.similarity_score).collect::<Vec<_>>(),
            vec![1.0, 0.5, 0.25]
        );
        assert_eq!(
            results.iter().map(|hit| hit.chunk.index).collect::<Vec<_>>(),
            vec![1, 2, 0]
        );
        assert!(results.iter().all(|hit| hit.source_document_id == "doc-1"));
        assert!(results.iter().all(|hit| hit.embedding.is_none()));

        let with_vectors = index.search_with(&[0.0, 0.0, 0.0], 1, true).unwrap();
        assert_eq!(with_vectors[0].embedding, Some(vec![0.0, 0.0, 0.0]));
    }

    #[test]
    fn ties_prefer_the_lower_position() {
        let mut index = VectorIndex::new("doc-1", 2).unwrap();
        index
            .add(
                chunks("doc-1", 4),
                &[
                    vec![2.0, 0.0],
                    vec![1.0, 0.0],
                    vec![0.0, 1.0],
                    vec![1.0, 0.0],
                ],
            )
            .unwrap();

        let results = index.search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(
            results.iter().map(|hit| hit.chunk.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn top_k_is_clamped_to_stored_count() {
        let mut index = VectorIndex::new("doc-1", 1).unwrap();
        index.add(chunks("doc-1", 2), &[vec![0.0], vec![1.0]]).unwrap();

        assert_eq!(index.search(&[0.0], 10).unwrap().len(), 2);
        assert!(index.search(&[0.0], 0).unwrap().is_empty());
        assert!(matches!(
            index.search(&[0.0, 1.0], 1),
            Err(RetrievalError::DimensionMismatch {
                subject: "query vector dimension",
                ..
            })
        ));
    }

    #[test]
    fn serialized_index_answers_identically() {
        let mut rng = StdRng::seed_from_u64(7);
        let vectors: Vec<Vec<f32>> = (0..50)
            .map(|_| (0..384).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect();
        let query: Vec<f32> = (0..384).map(|_| rng.random_range(-1.0..1.0)).collect();

        let mut index = VectorIndex::new("doc-1", 384).unwrap();
        index.add(chunks("doc-1", 50), &vectors).unwrap();

        let mut bytes = Vec::new();
        index.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 50 * 384 * BYTES_PER_F32);

        let restored =
            VectorIndex::deserialize("doc-1", &mut bytes.as_slice(), index.chunks().to_vec())
                .unwrap();

        let before = index.search(&query, 10).unwrap();
        let after = restored.search(&query, 10).unwrap();
        assert_eq!(before.len(), 10);
        for (left, right) in before.iter().zip(&after) {
            assert_eq!(left.chunk, right.chunk);
            assert_eq!(left.rank, right.rank);
            assert_eq!(left.similarity_score, right.similarity_score);
        }
    }

    #[test]
    fn malformed_buffers_are_rejected() {
        let mut index = VectorIndex::new("doc-1", 2).unwrap();
        index
            .add(chunks("doc-1", 2), &[vec![0.0, 1.0], vec![1.0, 0.0]])
            .unwrap();
        let mut bytes = Vec::new();
        index.serialize(&mut bytes).unwrap();

        let restore = |bytes: &[u8], chunk_count: usize| {
            VectorIndex::deserialize("doc-1", &mut &bytes[..], chunks("doc-1", chunk_count))
        };

        assert!(restore(&bytes[..], 2).is_ok());
        assert!(matches!(restore(&bytes[..], 3), Err(PersistenceError::Corrupt(_))));
        assert!(matches!(
            restore(&bytes[..bytes.len() - 1], 2),
            Err(PersistenceError::Corrupt(_))
        ));
        assert!(matches!(restore(&bytes[..10], 2), Err(PersistenceError::Corrupt(_))));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(restore(&trailing[..], 2), Err(PersistenceError::Corrupt(_))));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(restore(&bad_magic[..], 2), Err(PersistenceError::Corrupt(_))));
    }
}
