//! Sensitivity classification.
//!
//! Structural placement is the authoritative default: a document under a
//! restricted-owner folder yields restricted chunks with that owner, and the
//! structural signal is a floor that content scanning never lowers. The
//! content scan runs per chunk and escalates an otherwise-general chunk to
//! restricted with no owner (a "caution" classification, admin-only), so one
//! sensitive paragraph does not restrict an entire document.
//!
//! Detection rules are a pluggable [`SensitivityScanner`] strategy so they
//! can evolve without touching the sync engine. Classification is a pure
//! function of (chunk text, placement); nothing memoizes across documents.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::types::{FolderPlacement, Sensitivity};

/// A hint that chunk text contains sensitive content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensitivityHint {
    /// Name of the rule that matched, for audit logging.
    pub rule: &'static str,
}

/// Content-based detection strategy.
pub trait SensitivityScanner: Send + Sync {
    /// Returns a hint when `text` appears to contain sensitive content.
    fn scan(&self, text: &str) -> Option<SensitivityHint>;
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email pattern")
});
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d{1,3}[ .\-]?\(?\d{2,4}\)?[ .\-]?\d{3,4}[ .\-]?\d{3,4}\b")
        .expect("phone pattern")
});
static GOVERNMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("government id pattern"));
static MONETARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:salary|compensation|wage|bonus)\b[^\n]{0,40}?[$€£]?\s?\d[\d,]*")
        .expect("monetary pattern")
});

/// Default scanner: regex rules for emails, phone numbers, government-id
/// patterns, and salary/monetary figures.
#[derive(Clone, Debug, Default)]
pub struct RegexScanner;

impl RegexScanner {
    pub fn new() -> Self {
        Self
    }
}

impl SensitivityScanner for RegexScanner {
    fn scan(&self, text: &str) -> Option<SensitivityHint> {
        if EMAIL.is_match(text) {
            return Some(SensitivityHint { rule: "email" });
        }
        if GOVERNMENT_ID.is_match(text) {
            return Some(SensitivityHint {
                rule: "government_id",
            });
        }
        if MONETARY.is_match(text) {
            return Some(SensitivityHint { rule: "monetary" });
        }
        if PHONE.is_match(text) {
            return Some(SensitivityHint { rule: "phone" });
        }
        None
    }
}

/// Combines structural placement with the content scan.
#[derive(Clone)]
pub struct Classifier {
    scanner: Arc<dyn SensitivityScanner>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Arc::new(RegexScanner::new()))
    }
}

impl Classifier {
    pub fn new(scanner: Arc<dyn SensitivityScanner>) -> Self {
        Self { scanner }
    }

    /// Computes `(sensitivity, owner)` for one chunk.
    ///
    /// Unknown placement fails safe to restricted with no owner.
    pub fn classify(
        &self,
        placement: &FolderPlacement,
        text: &str,
    ) -> (Sensitivity, Option<String>) {
        match placement {
            FolderPlacement::RestrictedOwner(owner) => {
                (Sensitivity::Restricted, Some(owner.clone()))
            }
            FolderPlacement::Unknown => (Sensitivity::Restricted, None),
            FolderPlacement::General => {
                if let Some(hint) = self.scanner.scan(text) {
                    tracing::debug!(rule = hint.rule, "escalating general chunk to restricted");
                    (Sensitivity::Restricted, None)
                } else {
                    (Sensitivity::General, None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_folder_is_authoritative() {
        let classifier = Classifier::default();
        let placement = FolderPlacement::RestrictedOwner("u42".into());
        let (sensitivity, owner) = classifier.classify(&placement, "nothing sensitive here");
        assert_eq!(sensitivity, Sensitivity::Restricted);
        assert_eq!(owner.as_deref(), Some("u42"));
    }

    #[test]
    fn scan_never_downgrades_restricted() {
        struct AlwaysClean;
        impl SensitivityScanner for AlwaysClean {
            fn scan(&self, _: &str) -> Option<SensitivityHint> {
                None
            }
        }
        let classifier = Classifier::new(Arc::new(AlwaysClean));
        let placement = FolderPlacement::RestrictedOwner("u42".into());
        let (sensitivity, _) = classifier.classify(&placement, "plain text");
        assert_eq!(sensitivity, Sensitivity::Restricted);
    }

    #[test]
    fn general_chunk_with_email_escalates_without_owner() {
        let classifier = Classifier::default();
        let (sensitivity, owner) =
            classifier.classify(&FolderPlacement::General, "contact jane.doe@example.com");
        assert_eq!(sensitivity, Sensitivity::Restricted);
        assert!(owner.is_none(), "caution escalation carries no owner");
    }

    #[test]
    fn escalation_is_per_chunk() {
        let classifier = Classifier::default();
        let clean = classifier.classify(&FolderPlacement::General, "remote work policy overview");
        let dirty =
            classifier.classify(&FolderPlacement::General, "payroll SSN on file: 123-45-6789");
        assert_eq!(clean.0, Sensitivity::General);
        assert_eq!(dirty.0, Sensitivity::Restricted);
    }

    #[test]
    fn unknown_placement_fails_safe() {
        let classifier = Classifier::default();
        let (sensitivity, owner) = classifier.classify(&FolderPlacement::Unknown, "whatever");
        assert_eq!(sensitivity, Sensitivity::Restricted);
        assert!(owner.is_none());
    }

    #[test]
    fn salary_figures_trigger_monetary_rule() {
        let scanner = RegexScanner::new();
        let hint = scanner.scan("Annual salary: $120,000 effective June.");
        assert_eq!(hint.map(|h| h.rule), Some("monetary"));
    }

    #[test]
    fn plain_prose_is_clean() {
        let scanner = RegexScanner::new();
        assert!(scanner.scan("The office closes at five.").is_none());
    }
}
