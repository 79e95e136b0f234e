//! Token-bounded, deterministic chunking.
//!
//! Text units longer than the configured bound split at semantic boundaries
//! (paragraph, then sentence, then hard cut) with a configured token overlap
//! carried between consecutive chunks from the same unit. Table and image
//! units are never split. Re-chunking identical content with identical
//! configuration always reproduces the same boundaries and the same chunk
//! ids, which is what makes re-ingestion idempotent.

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkerConfig;
use crate::types::{ChunkRecord, ContentUnit, Sensitivity, SourceLocator, UnitKind};

/// Word-count token estimate. Deterministic and tokenizer-free; close
/// enough for bounding chunk sizes.
pub fn estimate_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// Deterministic chunk id: truncated SHA-256 over document id, position,
/// and text.
pub fn chunk_id(document_id: &str, position: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(position.to_be_bytes());
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

#[derive(Clone, Debug, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks the ordered unit sequence of one document.
    ///
    /// Produced records carry a placeholder `general` classification; the
    /// classifier stamps the real `(sensitivity, owner)` pair afterwards.
    pub fn chunk_units(
        &self,
        document_id: &str,
        document_name: &str,
        url: Option<&str>,
        units: &[ContentUnit],
    ) -> Vec<ChunkRecord> {
        let mut chunks = Vec::new();
        let mut position = 0usize;

        for unit in units {
            let pieces = match unit.kind {
                // Tables and images become exactly one chunk regardless of size.
                UnitKind::Table | UnitKind::Image => vec![unit.text.clone()],
                UnitKind::Text => {
                    if unit.text.trim().is_empty() {
                        continue;
                    }
                    self.split_text(&unit.text)
                }
            };

            for piece in pieces {
                let id = chunk_id(document_id, position, &piece);
                chunks.push(ChunkRecord {
                    id,
                    document_id: document_id.to_string(),
                    position,
                    token_count: estimate_tokens(&piece),
                    text: piece,
                    kind: unit.kind,
                    sensitivity: Sensitivity::General,
                    owner: None,
                    language: self.config.language.clone(),
                    locator: SourceLocator {
                        document_id: document_id.to_string(),
                        document_name: document_name.to_string(),
                        page: unit.page,
                        url: url.map(str::to_string),
                    },
                    embedding: None,
                });
                position += 1;
            }
        }

        chunks
    }

    /// Splits one text unit into token-bounded pieces with overlap.
    fn split_text(&self, text: &str) -> Vec<String> {
        let max = self.config.max_tokens.max(1);
        if estimate_tokens(text) <= max {
            return vec![text.trim().to_string()];
        }

        let overlap = self.config.overlap_tokens.min(max / 2);
        // Pieces are packed to a reduced budget so that prepending the
        // overlap never pushes a chunk past the configured maximum.
        let budget = (max - overlap).max(1);

        let mut segments: Vec<String> = Vec::new();
        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if estimate_tokens(paragraph) <= budget {
                segments.push(paragraph.to_string());
                continue;
            }
            for sentence in paragraph.unicode_sentences() {
                let sentence = sentence.trim();
                if sentence.is_empty() {
                    continue;
                }
                if estimate_tokens(sentence) <= budget {
                    segments.push(sentence.to_string());
                } else {
                    segments.extend(hard_cut(sentence, budget));
                }
            }
        }

        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;
        for segment in segments {
            let segment_tokens = estimate_tokens(&segment);
            if current_tokens > 0 && current_tokens + segment_tokens > budget {
                pieces.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&segment);
            current_tokens += segment_tokens;
        }
        if !current.is_empty() {
            pieces.push(current);
        }

        if overlap == 0 || pieces.len() < 2 {
            return pieces;
        }

        let mut overlapped = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            if i == 0 {
                overlapped.push(piece.clone());
            } else {
                let carried = trailing_words(&pieces[i - 1], overlap);
                if carried.is_empty() {
                    overlapped.push(piece.clone());
                } else {
                    overlapped.push(format!("{carried} {piece}"));
                }
            }
        }
        overlapped
    }
}

/// Fixed-size word windows for a sentence that exceeds the budget on its own.
fn hard_cut(sentence: &str, budget: usize) -> Vec<String> {
    let words: Vec<&str> = sentence.unicode_words().collect();
    words
        .chunks(budget.max(1))
        .map(|window| window.join(" "))
        .collect()
}

/// The last `count` words of `text`, joined by single spaces.
fn trailing_words(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.unicode_words().collect();
    let start = words.len().saturating_sub(count);
    words[start..].join(" ")
}
