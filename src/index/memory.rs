//! In-memory vector index.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ChunkHit, VectorIndex, cosine_similarity};
use crate::error::VaultError;
use crate::types::ChunkRecord;

/// Brute-force cosine index over a `HashMap`. Retrieval reads never block
/// ingestion writes for long; the lock is held only for the scan itself.
#[derive(Default)]
pub struct MemoryVectorIndex {
    chunks: RwLock<HashMap<String, ChunkRecord>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, chunks: Vec<ChunkRecord>) -> Result<(), VaultError> {
        for chunk in &chunks {
            if chunk.embedding.is_none() {
                return Err(VaultError::IndexWrite(format!(
                    "chunk {} has no embedding",
                    chunk.id
                )));
            }
        }
        let mut guard = self.chunks.write();
        for chunk in chunks {
            guard.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, VaultError> {
        let mut guard = self.chunks.write();
        let before = guard.len();
        guard.retain(|_, chunk| chunk.document_id != document_id);
        Ok(before - guard.len())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ChunkHit>, VaultError> {
        let guard = self.chunks.read();
        let mut hits: Vec<ChunkHit> = guard
            .values()
            .map(|chunk| ChunkHit {
                score: chunk
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(query, e))
                    .unwrap_or(0.0),
                chunk: chunk.clone(),
            })
            .collect();
        drop(guard);

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<String>, VaultError> {
        let guard = self.chunks.read();
        let mut entries: Vec<(usize, String)> = guard
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .map(|chunk| (chunk.position, chunk.id.clone()))
            .collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    async fn count(&self) -> Result<usize, VaultError> {
        Ok(self.chunks.read().len())
    }
}
