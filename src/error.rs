//! Error taxonomy for ingestion and retrieval.
//!
//! Variants are split along retry semantics: [`VaultError::UnsupportedFormat`]
//! is fatal for a document and never retried, while fetch/embedding/index
//! failures are transient and leave the document `failed` with an incremented
//! retry count. Access denials are not errors at all; the retrieval pipeline
//! silently drops denied candidates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    /// No extractor is registered for the document's MIME type.
    /// Fatal per document; the sync record is marked `failed` without retry.
    #[error("unsupported format: {mime_type}")]
    UnsupportedFormat { mime_type: String },

    /// The remote file store could not deliver the document.
    #[error("fetch failed for document {document_id}: {reason}")]
    Fetch { document_id: String, reason: String },

    /// The embedding provider failed after bounded retries.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A vector index write could not be completed.
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// Sync ledger or vector store persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The generation model call failed or timed out.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A change notification failed verification.
    #[error("notification rejected: {0}")]
    Intake(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl VaultError {
    /// Whether a failed document sync should be eligible for retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            VaultError::UnsupportedFormat { .. } | VaultError::Intake(_)
        )
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io(err.to_string())
    }
}
