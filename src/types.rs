//! Domain types shared across the ingestion and retrieval pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensitivity label attached to every indexed chunk.
///
/// A chunk's label and owner are immutable once written; the only way to
/// change them is a full re-classification during re-ingestion of the parent
/// document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    General,
    Restricted,
}

/// Capabilities granted to a requesting identity by the external auth
/// collaborator. Supplied per request and trusted input to the access filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// May additionally see restricted chunks owned by this identity.
    OwnerRestricted,
    /// May see all restricted chunks, including caution-escalated ones
    /// with no specific owner.
    Admin,
}

/// A requesting identity as handed over by the auth collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub owner_id: String,
    pub capabilities: Vec<Capability>,
}

impl Identity {
    /// Identity with no elevated capabilities; sees only general chunks.
    pub fn general(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            capabilities: Vec::new(),
        }
    }

    /// Identity that may see its own restricted chunks.
    pub fn elevated(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            capabilities: vec![Capability::OwnerRestricted],
        }
    }

    /// Identity with the administrative capability.
    pub fn admin(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            capabilities: vec![Capability::OwnerRestricted, Capability::Admin],
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Structural placement of a document at the source, used as the
/// authoritative classification default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderPlacement {
    /// A general-access folder.
    General,
    /// A restricted folder owned by the given identity.
    RestrictedOwner(String),
    /// Placement could not be resolved; classification fails safe to
    /// restricted with no owner.
    Unknown,
}

/// Kind tag on an extracted content unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Text,
    Table,
    Image,
}

/// One typed unit of extracted content, in document order.
///
/// Tables are serialized whole; images carry OCR text (possibly empty) in
/// `text` so they stay embeddable and retrievable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub kind: UnitKind,
    pub text: String,
    /// 1-based page or slide number where the unit originated, if known.
    pub page: Option<u32>,
}

impl ContentUnit {
    pub fn text_unit(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: UnitKind::Text,
            text: text.into(),
            page,
        }
    }

    pub fn table(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: UnitKind::Table,
            text: text.into(),
            page,
        }
    }

    pub fn image(ocr_text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: UnitKind::Image,
            text: ocr_text.into(),
            page,
        }
    }
}

/// Where a chunk came from, precise enough for citations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    pub document_id: String,
    pub document_name: String,
    pub page: Option<u32>,
    pub url: Option<String>,
}

/// The atomic indexed unit: a classified, embeddable slice of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Deterministic identifier derived from document id, position, and text,
    /// so replayed ingestion regenerates identical ids.
    pub id: String,
    pub document_id: String,
    /// Zero-based position within the document.
    pub position: usize,
    pub text: String,
    pub kind: UnitKind,
    pub sensitivity: Sensitivity,
    /// Present only when `sensitivity` is restricted with a specific owner.
    /// Caution-escalated chunks are restricted with no owner.
    pub owner: Option<String>,
    pub token_count: usize,
    pub language: String,
    pub locator: SourceLocator,
    /// The embedding vector, once computed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Kind of change reported by the remote file store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Trashed,
}

impl ChangeKind {
    /// Deleted and trashed documents are handled identically: chunks removed,
    /// sync record retained as an audit trail.
    pub fn is_removal(self) -> bool {
        matches!(self, ChangeKind::Deleted | ChangeKind::Trashed)
    }
}

/// A change notification as delivered to the intake endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Delivery identifier used for deduplication of redeliveries.
    pub delivery_id: String,
    pub document_id: String,
    pub kind: ChangeKind,
    /// Shared-secret token the sender must present.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
    #[serde(default = "Utc::now")]
    pub delivered_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(
        delivery_id: impl Into<String>,
        document_id: impl Into<String>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            document_id: document_id.into(),
            kind,
            token: None,
            delivered_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_capability_lookup() {
        let id = Identity::elevated("u42");
        assert!(id.has(Capability::OwnerRestricted));
        assert!(!id.has(Capability::Admin));
        assert!(Identity::admin("ops").has(Capability::Admin));
        assert!(Identity::general("u7").capabilities.is_empty());
    }

    #[test]
    fn removal_kinds() {
        assert!(ChangeKind::Deleted.is_removal());
        assert!(ChangeKind::Trashed.is_removal());
        assert!(!ChangeKind::Created.is_removal());
        assert!(!ChangeKind::Updated.is_removal());
    }

    #[test]
    fn chunk_record_roundtrips_through_json() {
        let chunk = ChunkRecord {
            id: "abc".into(),
            document_id: "doc-1".into(),
            position: 0,
            text: "hello".into(),
            kind: UnitKind::Text,
            sensitivity: Sensitivity::General,
            owner: None,
            token_count: 1,
            language: "en".into(),
            locator: SourceLocator {
                document_id: "doc-1".into(),
                document_name: "hello.txt".into(),
                page: None,
                url: None,
            },
            embedding: None,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: ChunkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }
}
