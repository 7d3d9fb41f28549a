use crate::error::PersistenceError;
use crate::models::{Chunk, ChunkRecord};
use crate::vector_index::VectorIndex;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

const VECTOR_EXTENSION: &str = "index";

const CHUNK_EXTENSION: &str = "json";

/// Directory holding, per document, a binary vector buffer and a JSON chunk
/// file with the same stem. The pair is only ever loaded as a unit.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vector_path(&self, document_id: &str) -> PathBuf {
        self.root.join(format!("{document_id}.{VECTOR_EXTENSION}"))
    }

    pub fn chunk_path(&self, document_id: &str) -> PathBuf {
        self.root.join(format!("{document_id}.{CHUNK_EXTENSION}"))
    }

    /// Ids of every document with a vector buffer on disk, sorted.
    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == VECTOR_EXTENSION)
            })
            .filter_map(|entry| {
                entry
                    .path()
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();

        ids.sort_unstable();
        ids
    }

    /// Writes the chunk file first and the vector buffer last. Each file is
    /// replaced atomically, and the loader keys on the vector buffer, so a
    /// crash never exposes a half-written pair.
    pub fn save(&self, index: &VectorIndex) -> Result<(), PersistenceError> {
        let records: Vec<ChunkRecord> = index.chunks().iter().map(Chunk::to_record).collect();

        self.write_atomically(&self.chunk_path(index.document_id()), |writer| {
            serde_json::to_writer_pretty(&mut *writer, &records)?;
            Ok(())
        })?;

        self.write_atomically(&self.vector_path(index.document_id()), |writer| {
            index.serialize(writer)
        })
    }

    pub fn load(&self, document_id: &str) -> Result<VectorIndex, PersistenceError> {
        let vector_path = self.vector_path(document_id);
        let chunk_path = self.chunk_path(document_id);

        if !chunk_path.is_file() {
            return Err(PersistenceError::MissingArtifact(chunk_path));
        }
        if !vector_path.is_file() {
            return Err(PersistenceError::MissingArtifact(vector_path));
        }

        let records: Vec<ChunkRecord> =
            serde_json::from_reader(BufReader::new(File::open(&chunk_path)?))?;
        let chunks = records
            .into_iter()
            .map(|record| Chunk::from_record(document_id, record))
            .collect();

        let mut reader = BufReader::new(File::open(&vector_path)?);
        VectorIndex::deserialize(document_id, &mut reader, chunks)
    }

    /// Removes both artifacts. Returns whether anything was on disk.
    pub fn remove(&self, document_id: &str) -> Result<bool, PersistenceError> {
        let removed_vectors = remove_if_present(&self.vector_path(document_id))?;
        let removed_chunks = remove_if_present(&self.chunk_path(document_id))?;
        Ok(removed_vectors || removed_chunks)
    }

    fn write_atomically<F>(&self, target: &Path, write: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<(), PersistenceError>,
    {
        let mut temp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(&mut temp);
            write(&mut writer)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(target).map_err(|error| error.error)?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<bool, PersistenceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}
