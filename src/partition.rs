use crate::domain::{IdentifierSet, ObjectId};
use crate::error::HarvestError;

/// Identifier layout of one harvest run: fixed-size request chunks grouped
/// into fixed-size output files.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    ids: &'a [ObjectId],
    chunk_size: usize,
    chunks_per_file: usize,
}

impl<'a> Partition<'a> {
    pub fn new(
        ids: &'a IdentifierSet,
        chunk_size: usize,
        chunks_per_file: usize,
    ) -> Result<Self, HarvestError> {
        if chunk_size == 0 {
            return Err(HarvestError::InvalidSettings(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if chunks_per_file == 0 {
            return Err(HarvestError::InvalidSettings(
                "chunks per file must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            ids: ids.as_slice(),
            chunk_size,
            chunks_per_file,
        })
    }

    pub fn record_count(&self) -> usize {
        self.ids.len()
    }

    pub fn total_chunks(&self) -> usize {
        self.ids.len().div_ceil(self.chunk_size)
    }

    pub fn total_files(&self) -> usize {
        self.total_chunks().div_ceil(self.chunks_per_file)
    }

    /// Identifier slice of a chunk addressed by its global index.
    pub fn chunk(&self, chunk_index: usize) -> Option<&'a [ObjectId]> {
        let start = chunk_index.checked_mul(self.chunk_size)?;
        if start >= self.ids.len() {
            return None;
        }
        let end = (start + self.chunk_size).min(self.ids.len());
        Some(&self.ids[start..end])
    }

    pub fn file_batch(&self, file_index: usize) -> Option<FileBatch<'a>> {
        let total_chunks = self.total_chunks();
        let first_chunk = file_index.checked_mul(self.chunks_per_file)?;
        if first_chunk >= total_chunks {
            return None;
        }
        let end_chunk = (first_chunk + self.chunks_per_file).min(total_chunks);
        let chunks = (first_chunk..end_chunk)
            .filter_map(|index| self.chunk(index))
            .collect();
        Some(FileBatch {
            file_index,
            first_chunk,
            chunks,
        })
    }

    pub fn file_batches(&self) -> impl Iterator<Item = FileBatch<'a>> + '_ {
        (0..self.total_files()).filter_map(|index| self.file_batch(index))
    }
}

/// Chunks whose records end up in one output file pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBatch<'a> {
    file_index: usize,
    first_chunk: usize,
    chunks: Vec<&'a [ObjectId]>,
}

impl<'a> FileBatch<'a> {
    pub fn file_index(&self) -> usize {
        self.file_index
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Global index of the batch-local chunk `local_index`.
    pub fn global_chunk_index(&self, local_index: usize) -> usize {
        self.first_chunk + local_index
    }

    pub fn chunk(&self, local_index: usize) -> Option<&'a [ObjectId]> {
        self.chunks.get(local_index).copied()
    }

    pub fn chunks(&self) -> &[&'a [ObjectId]] {
        &self.chunks
    }

    pub fn record_count(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len()).sum()
    }
}
