//! OCR result persistence.
//!
//! After a job succeeds and its pages are drained, the adapter writes the
//! three staging artifacts (full block dump, plain text, extraction
//! summary) and produces the inter-stage message for the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::{Block, BlockType, Result};
use crate::extraction;
use crate::models::BlobRef;
use crate::storage::{self, BlobStore};

/// Texts at or below this many characters ride inline between stages;
/// anything larger travels as a blob pointer only.
pub const INLINE_TEXT_LIMIT: usize = 5000;

/// Preview length in the extraction summary.
const PREVIEW_LIMIT: usize = 500;

/// Page count above which a job gets a size warning.
const PAGE_WARN_THRESHOLD: u32 = 50;

/// Inter-stage message produced by the OCR stage.
///
/// Carries the text pointer always; the text itself only when small
/// enough. Downstream stages re-read from the blob store when
/// `inline_text` is absent.
#[derive(Debug, Clone)]
pub struct OcrStageResult {
    pub job_handle: String,
    pub text_ref: BlobRef,
    pub inline_text: Option<String>,
    pub text_truncated: bool,
    pub extracted_fields: BTreeMap<String, String>,
    pub block_count: usize,
    pub line_count: usize,
}

#[derive(Serialize)]
struct FullResults<'a> {
    #[serde(rename = "documentId")]
    document_id: &'a str,
    #[serde(rename = "jobId")]
    job_id: &'a str,
    #[serde(rename = "blockCount")]
    block_count: usize,
    blocks: &'a [Block],
}

#[derive(Serialize)]
struct Statistics {
    #[serde(rename = "totalBlocksFound")]
    total_blocks_found: usize,
    #[serde(rename = "totalLinesExtracted")]
    total_lines_extracted: usize,
    #[serde(rename = "totalWordsExtracted")]
    total_words_extracted: usize,
    /// Average block confidence, persisted as a decimal string with full
    /// precision per the artifact contract.
    #[serde(rename = "confidenceScore")]
    confidence_score: String,
    #[serde(rename = "fieldsIdentified")]
    fields_identified: usize,
    #[serde(rename = "dataPoints")]
    data_points: usize,
}

#[derive(Serialize)]
struct ExtractionSummary<'a> {
    #[serde(rename = "documentId")]
    document_id: &'a str,
    #[serde(rename = "extractedData")]
    extracted_data: &'a BTreeMap<String, String>,
    statistics: Statistics,
    #[serde(rename = "rawTextPreview")]
    raw_text_preview: String,
    timestamp: String,
}

/// Writes OCR artifacts into the originals bucket.
pub struct OcrAdapter {
    blob: Arc<dyn BlobStore>,
    bucket: String,
    max_pages: u32,
}

impl OcrAdapter {
    pub fn new(blob: Arc<dyn BlobStore>, bucket: impl Into<String>, max_pages: u32) -> Self {
        Self {
            blob,
            bucket: bucket.into(),
            max_pages,
        }
    }

    /// Persist the complete block set for a finished job and build the
    /// inter-stage message.
    pub async fn persist_results(
        &self,
        document_id: &str,
        job_handle: &str,
        mut blocks: Vec<Block>,
    ) -> Result<OcrStageResult> {
        let page_count = blocks
            .iter()
            .filter_map(|b| b.page_number)
            .max()
            .unwrap_or(1);
        if page_count > PAGE_WARN_THRESHOLD {
            warn!(document_id, page_count, "large OCR job");
        }
        if self.max_pages > 0 && page_count > self.max_pages {
            warn!(
                document_id,
                page_count,
                max_pages = self.max_pages,
                "dropping pages beyond configured ceiling"
            );
            let cap = self.max_pages;
            blocks.retain(|b| b.page_number.unwrap_or(1) <= cap);
        }

        let lines: Vec<String> = blocks
            .iter()
            .filter(|b| b.block_type == BlockType::Line)
            .filter_map(|b| b.text.clone())
            .collect();
        let full_text = lines.join("\n");
        let extracted_fields = extraction::extract_fields(&lines);

        let word_count = blocks
            .iter()
            .filter(|b| b.block_type == BlockType::Word)
            .count();
        let confidences: Vec<f64> = blocks.iter().filter_map(|b| b.confidence).collect();
        let confidence_score = if confidences.is_empty() {
            "0".to_string()
        } else {
            let avg = confidences.iter().sum::<f64>() / confidences.len() as f64;
            format!("{avg}")
        };
        let data_points = lines.iter().filter(|l| !l.trim().is_empty()).count();

        let full_results = FullResults {
            document_id,
            job_id: job_handle,
            block_count: blocks.len(),
            blocks: &blocks,
        };
        self.blob
            .put(
                &self.bucket,
                &storage::full_results_key(document_id),
                &serde_json::to_vec(&full_results)
                    .map_err(|e| super::OcrError::Parse(e.to_string()))?,
                "application/json",
            )
            .await?;

        let text_key = storage::full_text_key(document_id);
        self.blob
            .put(&self.bucket, &text_key, full_text.as_bytes(), "text/plain")
            .await?;

        let summary = ExtractionSummary {
            document_id,
            extracted_data: &extracted_fields,
            statistics: Statistics {
                total_blocks_found: blocks.len(),
                total_lines_extracted: lines.len(),
                total_words_extracted: word_count,
                confidence_score,
                fields_identified: extracted_fields.len(),
                data_points,
            },
            raw_text_preview: preview(&full_text),
            timestamp: Utc::now().to_rfc3339(),
        };
        self.blob
            .put(
                &self.bucket,
                &storage::extraction_summary_key(document_id),
                &serde_json::to_vec(&summary)
                    .map_err(|e| super::OcrError::Parse(e.to_string()))?,
                "application/json",
            )
            .await?;

        let text_truncated = full_text.len() > INLINE_TEXT_LIMIT;
        info!(
            document_id,
            blocks = blocks.len(),
            lines = lines.len(),
            fields = extracted_fields.len(),
            text_truncated,
            "persisted OCR results"
        );

        Ok(OcrStageResult {
            job_handle: job_handle.to_string(),
            text_ref: BlobRef::new(self.bucket.clone(), text_key),
            inline_text: if text_truncated {
                None
            } else {
                Some(full_text)
            },
            text_truncated,
            extracted_fields,
            block_count: blocks.len(),
            line_count: lines.len(),
        })
    }
}

/// First 500 characters of the text, with an ellipsis marker when cut.
fn preview(text: &str) -> String {
    if text.len() <= PREVIEW_LIMIT {
        return text.to_string();
    }
    let mut end = PREVIEW_LIMIT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsBlobStore;
    use tempfile::tempdir;

    fn blocks_for(texts: &[&str]) -> Vec<Block> {
        let mut blocks = vec![Block {
            block_type: BlockType::Page,
            text: None,
            confidence: None,
            page_number: Some(1),
            geometry: None,
        }];
        for t in texts {
            blocks.push(Block::line(t, 99.0, 1));
            for word in t.split_whitespace() {
                blocks.push(Block {
                    block_type: BlockType::Word,
                    text: Some(word.to_string()),
                    confidence: Some(98.5),
                    page_number: Some(1),
                    geometry: None,
                });
            }
        }
        blocks
    }

    fn adapter(dir: &std::path::Path) -> (Arc<FsBlobStore>, OcrAdapter) {
        let store = Arc::new(FsBlobStore::new(dir).unwrap());
        let adapter = OcrAdapter::new(store.clone(), "originals", 0);
        (store, adapter)
    }

    #[tokio::test]
    async fn test_persists_three_artifacts() {
        let dir = tempdir().unwrap();
        let (store, adapter) = adapter(dir.path());

        let result = adapter
            .persist_results(
                "doc-1",
                "job-1",
                blocks_for(&["SOCIAL SECURITY NUMBER 123-45-6789", "BRANCH ARMY"]),
            )
            .await
            .unwrap();

        let raw = store
            .get("originals", "textract-results/doc-1/full_results.json")
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed["jobId"], "job-1");
        assert_eq!(parsed["blockCount"], parsed["blocks"].as_array().unwrap().len());

        let text = store
            .get("originals", "textract-results/doc-1/full_text.txt")
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap(),
            "SOCIAL SECURITY NUMBER 123-45-6789\nBRANCH ARMY"
        );

        let raw = store
            .get("originals", "textract-results/doc-1/extraction_summary.json")
            .await
            .unwrap();
        let summary: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(summary["documentId"], "doc-1");
        assert_eq!(summary["extractedData"]["ssn"], "123-45-6789");
        assert_eq!(summary["statistics"]["totalLinesExtracted"], 2);
        assert!(summary["statistics"]["confidenceScore"].is_string());

        assert!(!result.text_truncated);
        assert_eq!(result.inline_text.as_deref().unwrap().len(), 46);
    }

    #[tokio::test]
    async fn test_long_text_travels_as_pointer() {
        let dir = tempdir().unwrap();
        let (store, adapter) = adapter(dir.path());

        let long_line = "A".repeat(600);
        let texts: Vec<&str> = (0..10).map(|_| long_line.as_str()).collect();
        let result = adapter
            .persist_results("doc-2", "job-2", blocks_for(&texts))
            .await
            .unwrap();

        assert!(result.text_truncated);
        assert!(result.inline_text.is_none());
        // The full text stays retrievable through the pointer.
        let stored = store
            .get(&result.text_ref.bucket, &result.text_ref.key)
            .await
            .unwrap();
        assert_eq!(stored.len(), 600 * 10 + 9);
    }

    #[tokio::test]
    async fn test_preview_capped_with_ellipsis() {
        let dir = tempdir().unwrap();
        let (store, adapter) = adapter(dir.path());

        let long_line = "B".repeat(800);
        adapter
            .persist_results("doc-3", "job-3", blocks_for(&[long_line.as_str()]))
            .await
            .unwrap();

        let raw = store
            .get("originals", "textract-results/doc-3/extraction_summary.json")
            .await
            .unwrap();
        let summary: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let preview = summary["rawTextPreview"].as_str().unwrap();
        assert_eq!(preview.len(), 503);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_preview_short_text_untouched() {
        assert_eq!(preview("short"), "short");
    }
}
