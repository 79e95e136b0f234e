//! Content extraction: raw file bytes to an ordered sequence of typed units.
//!
//! Extractors are registered per MIME type; a document whose type has no
//! handler fails with [`VaultError::UnsupportedFormat`], which is fatal for
//! that document. Inside a document, a unit that cannot be parsed is
//! recorded as a skipped unit with a reason and extraction continues;
//! only whole-document failures propagate to the sync record.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VaultError;
use crate::source::{FetchedDocument, NoopOcr, OcrEngine};
use crate::types::ContentUnit;

/// A unit that failed to parse, recorded so extraction can continue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedUnit {
    pub page: Option<u32>,
    pub reason: String,
}

/// Ordered extraction result for one document.
#[derive(Clone, Debug, Default)]
pub struct ExtractedDocument {
    pub units: Vec<ContentUnit>,
    pub skipped: Vec<SkippedUnit>,
}

/// One format handler.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn handles(&self, mime_type: &str) -> bool;

    async fn extract(
        &self,
        document: &FetchedDocument,
        ocr: &dyn OcrEngine,
    ) -> Result<ExtractedDocument, VaultError>;
}

/// Plain text and markdown. Form feeds act as page separators, and every
/// blank-line-delimited paragraph becomes its own unit, so downstream
/// chunking and classification operate per paragraph rather than per page.
#[derive(Clone, Debug, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    fn handles(&self, mime_type: &str) -> bool {
        matches!(mime_type, "text/plain" | "text/markdown")
    }

    async fn extract(
        &self,
        document: &FetchedDocument,
        _ocr: &dyn OcrEngine,
    ) -> Result<ExtractedDocument, VaultError> {
        let text = String::from_utf8_lossy(&document.bytes);
        let paged = text.contains('\u{0c}');
        let mut units = Vec::new();
        for (index, page) in text.split('\u{0c}').enumerate() {
            let page_no = if paged { Some(index as u32 + 1) } else { None };
            for paragraph in page.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
                units.push(ContentUnit::text_unit(paragraph, page_no));
            }
        }
        Ok(ExtractedDocument {
            units,
            skipped: Vec::new(),
        })
    }
}

/// CSV / TSV spreadsheets. The whole sheet is serialized as one markdown
/// table unit; tables are never split downstream.
#[derive(Clone, Debug, Default)]
pub struct CsvExtractor;

impl CsvExtractor {
    fn delimiter(mime_type: &str) -> char {
        if mime_type == "text/tab-separated-values" {
            '\t'
        } else {
            ','
        }
    }
}

#[async_trait]
impl Extractor for CsvExtractor {
    fn handles(&self, mime_type: &str) -> bool {
        matches!(mime_type, "text/csv" | "text/tab-separated-values")
    }

    async fn extract(
        &self,
        document: &FetchedDocument,
        _ocr: &dyn OcrEngine,
    ) -> Result<ExtractedDocument, VaultError> {
        let text = String::from_utf8_lossy(&document.bytes);
        let delimiter = Self::delimiter(&document.mime_type);

        let mut rendered = String::new();
        for (row_index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split(delimiter).map(str::trim).collect();
            rendered.push_str("| ");
            rendered.push_str(&cells.join(" | "));
            rendered.push_str(" |\n");
            if row_index == 0 {
                rendered.push_str(&format!("|{}\n", " --- |".repeat(cells.len())));
            }
        }

        let units = if rendered.is_empty() {
            Vec::new()
        } else {
            vec![ContentUnit::table(rendered, Some(1))]
        };
        Ok(ExtractedDocument {
            units,
            skipped: Vec::new(),
        })
    }
}

/// Images. The unit's text is the OCR result; an OCR failure does not fail
/// the document, it yields a skipped unit instead.
#[derive(Clone, Debug, Default)]
pub struct ImageExtractor;

#[async_trait]
impl Extractor for ImageExtractor {
    fn handles(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/")
    }

    async fn extract(
        &self,
        document: &FetchedDocument,
        ocr: &dyn OcrEngine,
    ) -> Result<ExtractedDocument, VaultError> {
        match ocr.recognize(&document.bytes).await {
            Ok(text) => Ok(ExtractedDocument {
                units: vec![ContentUnit::image(text, Some(1))],
                skipped: Vec::new(),
            }),
            Err(err) => Ok(ExtractedDocument {
                units: Vec::new(),
                skipped: vec![SkippedUnit {
                    page: Some(1),
                    reason: format!("ocr failed: {err}"),
                }],
            }),
        }
    }
}

/// MIME-keyed registry over the available extractors.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    ocr: Arc<dyn OcrEngine>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults(Arc::new(NoopOcr))
    }
}

impl ExtractorRegistry {
    /// Registry with the built-in text, spreadsheet, and image handlers.
    pub fn with_defaults(ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            extractors: vec![
                Arc::new(PlainTextExtractor),
                Arc::new(CsvExtractor),
                Arc::new(ImageExtractor),
            ],
            ocr,
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Extracts `document`, or fails with `UnsupportedFormat` when no
    /// handler claims its MIME type.
    pub async fn extract(
        &self,
        document: &FetchedDocument,
    ) -> Result<ExtractedDocument, VaultError> {
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.handles(&document.mime_type))
            .ok_or_else(|| VaultError::UnsupportedFormat {
                mime_type: document.mime_type.clone(),
            })?;

        let extracted = extractor.extract(document, self.ocr.as_ref()).await?;
        if !extracted.skipped.is_empty() {
            tracing::warn!(
                document_id = %document.document_id,
                skipped = extracted.skipped.len(),
                "extraction skipped unparseable units"
            );
        }
        Ok(extracted)
    }
}
