//! The retrieval pipeline: query in, grounded answer out.
//!
//! Access filtering sits between vector search and everything downstream.
//! A chunk the caller may not see never reaches ranking, context assembly,
//! or the generation model, and is never logged in full. The pipeline is
//! deliberately infallible at the surface; internal errors degrade to a
//! fixed fallback answer so callers never see a stack of storage details.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::access::allow;
use crate::config::RetrievalConfig;
use crate::embed::Embedder;
use crate::error::VaultError;
use crate::index::{ChunkHit, VectorIndex};
use crate::source::GenerationModel;
use crate::types::{Identity, SourceLocator};

/// Returned when no accessible chunk matches the query. Identical wording
/// whether nothing matched or everything matched and was filtered, so the
/// answer leaks nothing about restricted content.
pub const NO_ACCESS_ANSWER: &str =
    "I don't have access to any information that answers your question.";

/// Returned when an internal step fails.
pub const FALLBACK_ANSWER: &str =
    "I ran into a problem while answering your question. Please try again later.";

static SANITIZE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore\s+(all\s+|the\s+)?previous\s+instructions",
        r"(?i)ignore\s+(all\s+|the\s+)?above\s+instructions",
        r"(?i)disregard\s+(all\s+|the\s+)?(previous|prior)\s+instructions",
        r"(?i)system\s+prompt",
        r"(?i)you\s+are\s+now\s+",
        r"(?i)act\s+as\s+",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("sanitize pattern must compile"))
    .collect()
});

/// Strips prompt-injection phrasing from a raw user query.
pub fn sanitize_query(query: &str) -> String {
    let mut cleaned = query.to_string();
    for pattern in SANITIZE_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, " ").into_owned();
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One answered query: the text, the citations behind it, and audit data.
#[derive(Clone, Debug)]
pub struct RetrievedAnswer {
    pub answer: String,
    /// Locators for exactly the chunks that fed the context window.
    pub sources: Vec<SourceLocator>,
    /// How many candidates access filtering removed, for audit.
    pub filtered_candidates: usize,
    pub audit_id: String,
}

pub struct RetrievalPipeline {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn GenerationModel>,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn GenerationModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            model,
            config,
        }
    }

    /// Answers `query` for `identity`. Never returns an error; internal
    /// failures produce [`FALLBACK_ANSWER`] with empty sources.
    #[instrument(skip(self, query), fields(audit_id))]
    pub async fn retrieve_and_answer(&self, query: &str, identity: &Identity) -> RetrievedAnswer {
        let audit_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("audit_id", audit_id.as_str());

        match self.answer_inner(query, identity, &audit_id).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(audit_id, error = %err, "retrieval failed, returning fallback");
                RetrievedAnswer {
                    answer: FALLBACK_ANSWER.to_string(),
                    sources: Vec::new(),
                    filtered_candidates: 0,
                    audit_id,
                }
            }
        }
    }

    async fn answer_inner(
        &self,
        query: &str,
        identity: &Identity,
        audit_id: &str,
    ) -> Result<RetrievedAnswer, VaultError> {
        let cleaned = sanitize_query(query);
        if cleaned.is_empty() {
            return Ok(self.no_access(audit_id, 0));
        }

        let query_embedding = self.embedder.embed_query(&cleaned).await?;
        let candidates = self
            .index
            .search(&query_embedding, self.config.top_k_pre)
            .await?;

        // Access decision per candidate, re-evaluated on every query.
        let candidate_count = candidates.len();
        let mut visible: Vec<ChunkHit> = candidates
            .into_iter()
            .filter(|hit| allow(&hit.chunk, identity))
            .collect();
        let filtered_candidates = candidate_count - visible.len();

        if visible.is_empty() {
            info!(
                audit_id,
                candidates = candidate_count,
                filtered = filtered_candidates,
                "no accessible chunks for query"
            );
            return Ok(self.no_access(audit_id, filtered_candidates));
        }

        visible.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        visible.truncate(self.config.top_k_post);

        let context = self.assemble_context(&visible);
        let answer = tokio::time::timeout(
            self.config.generation_timeout,
            self.model.generate(&context, &cleaned),
        )
        .await
        .map_err(|_| VaultError::Generation("generation timed out".to_string()))??;

        let sources: Vec<SourceLocator> = visible
            .iter()
            .map(|hit| hit.chunk.locator.clone())
            .collect();

        info!(
            audit_id,
            candidates = candidate_count,
            filtered = filtered_candidates,
            cited = sources.len(),
            "query answered"
        );

        Ok(RetrievedAnswer {
            answer,
            sources,
            filtered_candidates,
            audit_id: audit_id.to_string(),
        })
    }

    fn no_access(&self, audit_id: &str, filtered_candidates: usize) -> RetrievedAnswer {
        RetrievedAnswer {
            answer: NO_ACCESS_ANSWER.to_string(),
            sources: Vec::new(),
            filtered_candidates,
            audit_id: audit_id.to_string(),
        }
    }

    /// Numbered sections with provenance headers, snippets bounded so a
    /// single huge chunk cannot crowd out the rest of the window.
    fn assemble_context(&self, hits: &[ChunkHit]) -> String {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| {
                let locator = &hit.chunk.locator;
                let header = match locator.page {
                    Some(page) => {
                        format!("Source {} ({}, page {page})", i + 1, locator.document_name)
                    }
                    None => format!("Source {} ({})", i + 1, locator.document_name),
                };
                format!("{header}:\n{}", snippet(&hit.chunk.text, self.config.snippet_chars))
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

fn snippet(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
