//! External collaborator contracts.
//!
//! The remote file store, the OCR engine, and the generation model are
//! invoked through these narrow traits; their internals live outside this
//! crate. Mock implementations are exported for wiring and tests, in the
//! same way the embedding layer exports its deterministic mock.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::VaultError;
use crate::types::FolderPlacement;

/// A document as delivered by the remote file store.
#[derive(Clone, Debug)]
pub struct FetchedDocument {
    pub document_id: String,
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub placement: FolderPlacement,
    pub url: Option<String>,
}

/// Remote file store client. Failures surface as [`VaultError::Fetch`] and
/// mark the document's sync record `failed`.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, document_id: &str) -> Result<FetchedDocument, VaultError>;
}

/// Generation model invocation; contract only.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn generate(&self, context: &str, query: &str) -> Result<String, VaultError>;
}

/// Optical character recognition for image content.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, bytes: &[u8]) -> Result<String, VaultError>;
}

/// OCR engine that recognizes nothing. Image units keep an empty text
/// payload but remain indexed and retrievable by metadata.
#[derive(Clone, Debug, Default)]
pub struct NoopOcr;

#[async_trait]
impl OcrEngine for NoopOcr {
    async fn recognize(&self, _bytes: &[u8]) -> Result<String, VaultError> {
        Ok(String::new())
    }
}

/// In-memory document source for tests and local wiring.
#[derive(Default)]
pub struct StaticDocumentSource {
    documents: RwLock<HashMap<String, FetchedDocument>>,
}

impl StaticDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: FetchedDocument) {
        self.documents
            .write()
            .insert(document.document_id.clone(), document);
    }

    pub fn remove(&self, document_id: &str) {
        self.documents.write().remove(document_id);
    }
}

#[async_trait]
impl DocumentSource for StaticDocumentSource {
    async fn fetch(&self, document_id: &str) -> Result<FetchedDocument, VaultError> {
        self.documents
            .read()
            .get(document_id)
            .cloned()
            .ok_or_else(|| VaultError::Fetch {
                document_id: document_id.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Deterministic generation model that restates how much context it saw.
/// Useful for integration tests where answer grounding, not answer quality,
/// is under test.
#[derive(Clone, Debug, Default)]
pub struct EchoGenerationModel;

#[async_trait]
impl GenerationModel for EchoGenerationModel {
    async fn generate(&self, context: &str, query: &str) -> Result<String, VaultError> {
        let sections = context.split("\n\n---\n\n").filter(|s| !s.is_empty()).count();
        Ok(format!(
            "Answer to \"{query}\" grounded in {sections} context section(s)."
        ))
    }
}
