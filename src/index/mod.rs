//! Vector index backends.
//!
//! [`VectorIndex`] abstracts the derived store so the sync engine and the
//! retrieval pipeline work against any backend. Two implementations:
//!
//! - [`memory::MemoryVectorIndex`] — in-process, for tests and small corpora
//! - [`sqlite::SqliteVectorIndex`] — durable, cosine search via `sqlite-vec`
//!
//! Scores are cosine similarity normalized as `1 - distance`, identical in
//! both backends so callers can swap them freely. `delete_by_document` is a
//! no-op for unknown documents; re-ingestion always deletes before
//! reinserting so no stale chunks survive a shrinking edit.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::VaultError;
use crate::types::ChunkRecord;

/// One search result.
#[derive(Clone, Debug)]
pub struct ChunkHit {
    pub chunk: ChunkRecord,
    /// Cosine similarity, higher is better.
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces chunks keyed by their deterministic ids.
    /// Chunks without an embedding are rejected with `IndexWrite`.
    async fn upsert(&self, chunks: Vec<ChunkRecord>) -> Result<(), VaultError>;

    /// Removes every chunk of a document. Zero indexed chunks is a no-op,
    /// not an error.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, VaultError>;

    /// Ranked similarity search; ties resolve toward the earlier document
    /// position for deterministic ordering.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ChunkHit>, VaultError>;

    /// Chunk ids currently indexed for a document, in position order.
    async fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<String>, VaultError>;

    async fn count(&self) -> Result<usize, VaultError>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
