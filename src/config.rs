//! Configuration for the ingestion and retrieval pipelines.
//!
//! Defaults are overridable through builder-style `with_*` methods; the
//! ledger path additionally resolves from the environment (via `dotenvy`)
//! so deployments can point at a shared database file.

use std::time::Duration;

/// Bounds for the chunker.
#[derive(Clone, Debug)]
pub struct ChunkerConfig {
    /// Maximum chunk size in tokens. Table and image units ignore this
    /// bound; they are never split.
    pub max_tokens: usize,
    /// Tokens of overlap carried between consecutive chunks drawn from the
    /// same text unit.
    pub overlap_tokens: usize,
    /// Language tag stamped on produced chunks.
    pub language: String,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 40,
            language: "en".to_string(),
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_overlap_tokens(mut self, overlap_tokens: usize) -> Self {
        self.overlap_tokens = overlap_tokens;
        self
    }
}

/// Batching and retry policy for embedding calls.
#[derive(Clone, Debug)]
pub struct EmbedderConfig {
    pub batch_size: usize,
    /// Attempts per batch before the enclosing sync is marked failed.
    pub max_attempts: u32,
    /// Base backoff between attempts; doubled per retry.
    pub backoff: Duration,
    /// Upper bound on a single provider call.
    pub timeout: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_attempts: 3,
            backoff: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

impl EmbedderConfig {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Retrieval pipeline tuning.
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    /// Candidate pool fetched from the index before access filtering.
    pub top_k_pre: usize,
    /// Chunks kept for context assembly after filtering.
    pub top_k_post: usize,
    /// Per-chunk snippet bound (characters) in the assembled context.
    pub snippet_chars: usize,
    /// Upper bound on the generation model call.
    pub generation_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_pre: 30,
            top_k_post: 7,
            snippet_chars: 800,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

impl RetrievalConfig {
    #[must_use]
    pub fn with_top_k(mut self, pre: usize, post: usize) -> Self {
        self.top_k_pre = pre.max(1);
        self.top_k_post = post.max(1);
        self
    }

    #[must_use]
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }
}

/// Location of the sync ledger database.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub db_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: Self::resolve_db_path(None),
        }
    }
}

impl LedgerConfig {
    pub fn new(db_path: Option<String>) -> Self {
        Self {
            db_path: Self::resolve_db_path(db_path),
        }
    }

    fn resolve_db_path(provided: Option<String>) -> String {
        if let Some(path) = provided {
            return path;
        }
        dotenvy::dotenv().ok();
        std::env::var("RAGVAULT_DB").unwrap_or_else(|_| "ragvault.db".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_defaults_are_sane() {
        let cfg = ChunkerConfig::default();
        assert!(cfg.overlap_tokens < cfg.max_tokens);
    }

    #[test]
    fn embedder_batch_size_floor() {
        let cfg = EmbedderConfig::default().with_batch_size(0);
        assert_eq!(cfg.batch_size, 1);
    }

    #[test]
    fn ledger_path_override() {
        let cfg = LedgerConfig::new(Some("custom.db".into()));
        assert_eq!(cfg.db_path, "custom.db");
    }
}
