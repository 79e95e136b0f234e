//! The document sync engine: drives a change notification through fetch,
//! extraction, chunking, classification, and embedding, then swaps the
//! document's chunk set in the vector index.
//!
//! The swap is prepared before anything is deleted. Extraction or embedding
//! failures therefore leave the previously synced chunk set fully
//! queryable; only once the replacement set is embedded does the engine
//! delete the old chunks and insert the new ones.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::chunker::Chunker;
use crate::classify::Classifier;
use crate::embed::Embedder;
use crate::error::VaultError;
use crate::extract::ExtractorRegistry;
use crate::index::VectorIndex;
use crate::ledger::{ClaimOutcome, SyncLedger, SyncStatus};
use crate::source::DocumentSource;
use crate::types::{ChangeNotification, ChunkRecord};

/// What a notification ended up doing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The document's chunk set was replaced.
    Synced { chunks: usize },
    /// Content checksum matched the last successful sync; nothing to do.
    Unchanged,
    /// Another run holds the document's processing claim.
    Coalesced,
    /// The document's chunks were removed from the index.
    Deleted { removed: usize },
    /// The run failed after claiming; the ledger records the error.
    Failed { error: String },
}

pub struct SyncEngine {
    source: Arc<dyn DocumentSource>,
    registry: ExtractorRegistry,
    chunker: Chunker,
    classifier: Classifier,
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    ledger: SyncLedger,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        registry: ExtractorRegistry,
        chunker: Chunker,
        classifier: Classifier,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        ledger: SyncLedger,
    ) -> Self {
        Self {
            source,
            registry,
            chunker,
            classifier,
            embedder,
            index,
            ledger,
        }
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Processes one change notification end to end. Replaying the same
    /// notification converges on the same index state.
    #[instrument(skip(self, notification), fields(document_id = %notification.document_id, kind = ?notification.kind))]
    pub async fn handle_notification(
        &self,
        notification: &ChangeNotification,
    ) -> Result<SyncOutcome, VaultError> {
        if notification.kind.is_removal() {
            return self.remove_document(&notification.document_id).await;
        }
        self.sync_document(&notification.document_id).await
    }

    async fn remove_document(&self, document_id: &str) -> Result<SyncOutcome, VaultError> {
        let removed = self.index.delete_by_document(document_id).await?;
        self.ledger.mark_deleted(document_id).await?;
        info!(document_id, removed, "document removed from index");
        Ok(SyncOutcome::Deleted { removed })
    }

    /// Fetches and fully re-indexes one document.
    pub async fn sync_document(&self, document_id: &str) -> Result<SyncOutcome, VaultError> {
        let document = match self.source.fetch(document_id).await {
            Ok(document) => document,
            Err(err) => {
                warn!(document_id, error = %err, "fetch failed");
                self.ledger.mark_failed(document_id, &err).await?;
                return Ok(SyncOutcome::Failed {
                    error: err.to_string(),
                });
            }
        };

        let checksum = content_checksum(&document.bytes);
        if let Some(record) = self.ledger.status(document_id).await? {
            if record.status == SyncStatus::Synced && record.checksum.as_deref() == Some(&checksum)
            {
                info!(document_id, "checksum unchanged, skipping sync");
                return Ok(SyncOutcome::Unchanged);
            }
        }

        if self.ledger.claim(document_id, &document.name).await? == ClaimOutcome::Coalesced {
            info!(document_id, "sync already in progress, coalescing");
            return Ok(SyncOutcome::Coalesced);
        }

        match self.build_and_swap(document_id, &document).await {
            Ok(chunks) => {
                if !self.ledger.mark_synced(document_id, &checksum).await? {
                    // A removal notification landed while this run was in
                    // flight. The chunks just written belong to a deleted
                    // document; tear them back out.
                    let removed = self.index.delete_by_document(document_id).await?;
                    warn!(document_id, removed, "document removed mid-sync, chunks discarded");
                    return Ok(SyncOutcome::Deleted { removed });
                }
                info!(document_id, chunks, "document synced");
                Ok(SyncOutcome::Synced { chunks })
            }
            Err(err) => {
                warn!(document_id, error = %err, "sync failed, previous chunk set retained");
                self.ledger.mark_failed(document_id, &err).await?;
                Ok(SyncOutcome::Failed {
                    error: err.to_string(),
                })
            }
        }
    }

    /// Builds the replacement chunk set, embeds it, then swaps it in. Errors
    /// before the swap leave the index untouched.
    async fn build_and_swap(
        &self,
        document_id: &str,
        document: &crate::source::FetchedDocument,
    ) -> Result<usize, VaultError> {
        let extracted = self.registry.extract(document).await?;
        let mut chunks = self.chunker.chunk_units(
            document_id,
            &document.name,
            document.url.as_deref(),
            &extracted.units,
        );
        if chunks.is_empty() {
            // Nothing extractable (empty file, all-whitespace content). The
            // document is in sync with an empty chunk set.
            let removed = self.index.delete_by_document(document_id).await?;
            info!(document_id, removed, "document has no content, chunk set cleared");
            return Ok(0);
        }

        for chunk in &mut chunks {
            let (sensitivity, owner) = self.classifier.classify(&document.placement, &chunk.text);
            chunk.sensitivity = sensitivity;
            chunk.owner = owner;
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed_all(&texts).await?;
        let embedded: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| chunk.with_embedding(embedding))
            .collect();

        // Swap: old set out, new set in. The index may briefly be empty for
        // this document, never a mix of stale and fresh chunks.
        self.index.delete_by_document(document_id).await?;
        let count = embedded.len();
        self.index.upsert(embedded).await?;
        Ok(count)
    }

    /// Re-runs sync for failed documents still within the retry budget.
    pub async fn retry_failed(&self, max_retries: u32) -> Result<Vec<SyncOutcome>, VaultError> {
        let candidates = self.ledger.retryable_failures(max_retries).await?;
        let mut outcomes = Vec::with_capacity(candidates.len());
        for document_id in candidates {
            outcomes.push(self.sync_document(&document_id).await?);
        }
        Ok(outcomes)
    }
}

/// Sha-256 of the raw document bytes, hex encoded.
pub fn content_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkerConfig, EmbedderConfig};
    use crate::embed::{EmbeddingProvider, MockEmbeddingProvider};
    use crate::index::memory::MemoryVectorIndex;
    use crate::source::{FetchedDocument, NoopOcr, StaticDocumentSource};
    use crate::types::{ChangeKind, FolderPlacement};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn text_document(document_id: &str, paragraphs: &[&str]) -> FetchedDocument {
        FetchedDocument {
            document_id: document_id.to_string(),
            name: format!("{document_id}.txt"),
            mime_type: "text/plain".to_string(),
            bytes: paragraphs.join("\n\n").into_bytes(),
            placement: FolderPlacement::General,
            url: None,
        }
    }

    async fn engine(
        source: Arc<StaticDocumentSource>,
        index: Arc<MemoryVectorIndex>,
        dir: &tempfile::TempDir,
    ) -> SyncEngine {
        let ledger = SyncLedger::open(dir.path().join("ledger.db")).await.unwrap();
        SyncEngine::new(
            source,
            ExtractorRegistry::with_defaults(Arc::new(NoopOcr)),
            Chunker::new(ChunkerConfig::default()),
            Classifier::default(),
            Embedder::new(
                Arc::new(MockEmbeddingProvider::new()),
                EmbedderConfig::default(),
            ),
            index,
            ledger,
        )
    }

    fn notification(document_id: &str, kind: ChangeKind) -> ChangeNotification {
        ChangeNotification::new(uuid::Uuid::new_v4().to_string(), document_id, kind)
    }

    #[tokio::test]
    async fn sync_indexes_one_chunk_per_paragraph() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document(
            "policy",
            &["Remote work policy.", "Office hours.", "Travel rules."],
        ));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index.clone(), &dir).await;

        let outcome = engine
            .handle_notification(&notification("policy", ChangeKind::Created))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { chunks: 3 });
        assert_eq!(index.count().await.unwrap(), 3);

        let record = engine.ledger().status("policy").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert!(record.checksum.is_some());
    }

    #[tokio::test]
    async fn unchanged_content_short_circuits() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("policy", &["Same content."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index, &dir).await;

        engine
            .handle_notification(&notification("policy", ChangeKind::Created))
            .await
            .unwrap();
        let replay = engine
            .handle_notification(&notification("policy", ChangeKind::Updated))
            .await
            .unwrap();
        assert_eq!(replay, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn update_shrinks_chunk_set_without_leftovers() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document(
            "doc",
            &["One.", "Two.", "Three.", "Four.", "Five."],
        ));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source.clone(), index.clone(), &dir).await;

        engine
            .handle_notification(&notification("doc", ChangeKind::Created))
            .await
            .unwrap();
        assert_eq!(index.document_chunk_ids("doc").await.unwrap().len(), 5);

        source.insert(text_document("doc", &["Only.", "Two left."]));
        let outcome = engine
            .handle_notification(&notification("doc", ChangeKind::Updated))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { chunks: 2 });
        assert_eq!(index.document_chunk_ids("doc").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replay_converges_on_same_chunk_ids() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Alpha.", "Beta."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source.clone(), index.clone(), &dir).await;

        engine.sync_document("doc").await.unwrap();
        let mut first = index.document_chunk_ids("doc").await.unwrap();
        first.sort();

        // Force a re-sync by perturbing the ledger status.
        engine
            .ledger()
            .mark_failed("doc", &VaultError::Embedding("forced".into()))
            .await
            .unwrap();
        engine.sync_document("doc").await.unwrap();
        let mut second = index.document_chunk_ids("doc").await.unwrap();
        second.sort();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn deletion_removes_chunks_and_keeps_audit_row() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Body."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index.clone(), &dir).await;

        engine.sync_document("doc").await.unwrap();
        let outcome = engine
            .handle_notification(&notification("doc", ChangeKind::Trashed))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Deleted { removed: 1 });
        assert_eq!(index.count().await.unwrap(), 0);
        let record = engine.ledger().status("doc").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Deleted);
    }

    #[tokio::test]
    async fn fetch_failure_marks_failed_without_touching_index() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("kept", &["Kept body."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index.clone(), &dir).await;

        engine.sync_document("kept").await.unwrap();
        let outcome = engine.sync_document("missing").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(index.count().await.unwrap(), 1);
        let record = engine.ledger().status("missing").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn unsupported_format_marks_failed() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(FetchedDocument {
            document_id: "blob".to_string(),
            name: "blob.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            bytes: vec![0, 1, 2],
            placement: FolderPlacement::General,
            url: None,
        });
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index, &dir).await;

        let outcome = engine.sync_document("blob").await.unwrap();
        match outcome {
            SyncOutcome::Failed { error } => assert!(error.contains("octet-stream")),
            other => panic!("expected failure, got {other:?}"),
        }
        let record = engine.ledger().status("blob").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn unsupported_format_is_not_retried() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(FetchedDocument {
            document_id: "blob".to_string(),
            name: "blob.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            bytes: vec![0, 1, 2],
            placement: FolderPlacement::General,
            url: None,
        });
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index, &dir).await;

        engine.sync_document("blob").await.unwrap();
        let record = engine.ledger().status("blob").await.unwrap().unwrap();
        assert!(!record.retryable);
        // The retry sweep must skip it no matter how generous the budget.
        assert!(engine.retry_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn whitespace_only_update_clears_chunk_set() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Body."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source.clone(), index.clone(), &dir).await;

        engine.sync_document("doc").await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        source.insert(text_document("doc", &["   \n  "]));
        let outcome = engine.sync_document("doc").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { chunks: 0 });
        assert_eq!(index.count().await.unwrap(), 0);
        let record = engine.ledger().status("doc").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
    }

    /// Always errors on `embed_batch`, simulating a provider outage.
    struct DownProvider;

    #[async_trait]
    impl EmbeddingProvider for DownProvider {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
            Err(VaultError::Embedding("provider down".to_string()))
        }

        fn dimension(&self) -> usize {
            64
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    #[tokio::test]
    async fn embedding_failure_preserves_previous_chunk_set() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Original one.", "Original two."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let ledger = SyncLedger::open(dir.path().join("ledger.db")).await.unwrap();

        let healthy = SyncEngine::new(
            source.clone(),
            ExtractorRegistry::with_defaults(Arc::new(NoopOcr)),
            Chunker::new(ChunkerConfig::default()),
            Classifier::default(),
            Embedder::new(
                Arc::new(MockEmbeddingProvider::new()),
                EmbedderConfig::default(),
            ),
            index.clone(),
            ledger.clone(),
        );
        healthy.sync_document("doc").await.unwrap();
        let before = index.document_chunk_ids("doc").await.unwrap();
        assert_eq!(before.len(), 2);

        source.insert(text_document("doc", &["Changed content."]));
        let broken = SyncEngine::new(
            source,
            ExtractorRegistry::with_defaults(Arc::new(NoopOcr)),
            Chunker::new(ChunkerConfig::default()),
            Classifier::default(),
            Embedder::new(
                Arc::new(DownProvider),
                EmbedderConfig {
                    max_attempts: 1,
                    ..EmbedderConfig::default()
                },
            ),
            index.clone(),
            ledger,
        );
        let outcome = broken.sync_document("doc").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));

        let after = index.document_chunk_ids("doc").await.unwrap();
        assert_eq!(before.len(), after.len());
    }

    /// Fails the first `failures` batches, then behaves like the mock.
    struct FlakyProvider {
        inner: MockEmbeddingProvider,
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
            let failed = self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(VaultError::Embedding("transient".to_string()));
            }
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn retry_failed_recovers_after_transient_outage() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Recoverable body."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let ledger = SyncLedger::open(dir.path().join("ledger.db")).await.unwrap();

        let engine = SyncEngine::new(
            source,
            ExtractorRegistry::with_defaults(Arc::new(NoopOcr)),
            Chunker::new(ChunkerConfig::default()),
            Classifier::default(),
            Embedder::new(
                Arc::new(FlakyProvider {
                    inner: MockEmbeddingProvider::new(),
                    remaining_failures: AtomicU32::new(1),
                }),
                EmbedderConfig {
                    max_attempts: 1,
                    ..EmbedderConfig::default()
                },
            ),
            index.clone(),
            ledger,
        );

        let first = engine.sync_document("doc").await.unwrap();
        assert!(matches!(first, SyncOutcome::Failed { .. }));

        let retried = engine.retry_failed(3).await.unwrap();
        assert_eq!(retried, vec![SyncOutcome::Synced { chunks: 1 }]);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claimed_document_coalesces_second_run() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Body."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = engine(source, index, &dir).await;

        // Hold the claim directly, as a concurrent run would.
        engine.ledger().claim("doc", "doc.txt").await.unwrap();
        let outcome = engine.sync_document("doc").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Coalesced);
    }

    /// Embeds correctly but slowly, leaving a window for concurrent events.
    struct SlowProvider {
        inner: MockEmbeddingProvider,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn removal_during_inflight_sync_leaves_no_chunks() {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticDocumentSource::new());
        source.insert(text_document("doc", &["Body."]));
        let index = Arc::new(MemoryVectorIndex::new());
        let ledger = SyncLedger::open(dir.path().join("ledger.db")).await.unwrap();
        let engine = Arc::new(SyncEngine::new(
            source,
            ExtractorRegistry::with_defaults(Arc::new(NoopOcr)),
            Chunker::new(ChunkerConfig::default()),
            Classifier::default(),
            Embedder::new(
                Arc::new(SlowProvider {
                    inner: MockEmbeddingProvider::new(),
                }),
                EmbedderConfig::default(),
            ),
            index.clone(),
            ledger,
        ));

        let inflight = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync_document("doc").await }
        });
        // Let the sync claim the document and enter the embedding stage,
        // then deliver the removal while it is still in flight.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine
            .handle_notification(&notification("doc", ChangeKind::Trashed))
            .await
            .unwrap();

        let outcome = inflight.await.unwrap().unwrap();
        assert_eq!(outcome, SyncOutcome::Deleted { removed: 1 });
        assert_eq!(index.count().await.unwrap(), 0);
        let record = engine.ledger().status("doc").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Deleted);
    }
}
