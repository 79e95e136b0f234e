//! Access-controlled knowledge-base retrieval core.
//!
//! `ragvault` keeps a derived vector index consistent with a mutable remote
//! file store and answers natural-language queries against that index while
//! enforcing per-chunk, per-identity access control.
//!
//! ```text
//! Change notification ──► intake (verify + dedup) ──► sync::SyncEngine
//!                                                        │
//!            source::DocumentSource::fetch ◄─────────────┤
//!                                                        │
//!   extract ──► chunker ──► classify ──► embed ──► index::VectorIndex
//!                                                        │
//!                                           ledger::SyncLedger (status)
//!
//! Query ──► retrieval::RetrievalPipeline ──► index search
//!                 │                              │
//!                 └── access::allow filter ◄─────┘
//!                 │
//!                 └──► context assembly ──► source::GenerationModel ──► answer + citations
//! ```
//!
//! The access filter in [`access`] is the single gate between the vector
//! index and any content leaving the retrieval pipeline.

pub mod access;
pub mod chunker;
pub mod classify;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod index;
pub mod intake;
pub mod ledger;
pub mod retrieval;
pub mod source;
pub mod sync;
pub mod types;

pub use access::allow;
pub use chunker::Chunker;
pub use classify::{Classifier, RegexScanner, SensitivityScanner};
pub use config::{ChunkerConfig, EmbedderConfig, LedgerConfig, RetrievalConfig};
pub use embed::{Embedder, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use error::VaultError;
pub use extract::ExtractorRegistry;
pub use index::{ChunkHit, VectorIndex, memory::MemoryVectorIndex, sqlite::SqliteVectorIndex};
pub use intake::{ChangeIntake, IntakeOutcome};
pub use ledger::{ClaimOutcome, SyncLedger, SyncRecord, SyncStatus};
pub use retrieval::{RetrievalPipeline, RetrievedAnswer};
pub use source::{DocumentSource, FetchedDocument, GenerationModel, OcrEngine};
pub use sync::{SyncEngine, SyncOutcome};
pub use types::{
    Capability, ChangeKind, ChangeNotification, ChunkRecord, ContentUnit, FolderPlacement,
    Identity, Sensitivity, SourceLocator, UnitKind,
};
