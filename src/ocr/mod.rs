//! OCR service abstraction.
//!
//! The OCR service is an external asynchronous job API: submit a document,
//! poll until it settles, then page through block results. The client is a
//! trait so stage code tests against scripted fakes.

mod adapter;
mod http;

pub use adapter::{OcrAdapter, OcrStageResult, INLINE_TEXT_LIMIT};
pub use http::HttpOcrClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::BlobRef;

/// Errors from the OCR service boundary.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("OCR service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("OCR job failed: {0}")]
    JobFailed(String),
    #[error("Blob error: {0}")]
    Blob(#[from] crate::storage::BlobError),
}

impl OcrError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;

/// Block kinds delivered by the OCR service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    #[serde(other)]
    Other,
}

/// Bounding box of a block, in page-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// One OCR result block.
///
/// Serialized field names match the wire format of the OCR service so the
/// full-results artifact replays byte-compatible block lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "BlockType")]
    pub block_type: BlockType,
    #[serde(rename = "Text", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "Confidence", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(rename = "Page", skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(rename = "Geometry", skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

impl Block {
    pub fn line(text: &str, confidence: f64, page: u32) -> Self {
        Self {
            block_type: BlockType::Line,
            text: Some(text.to_string()),
            confidence: Some(confidence),
            page_number: Some(page),
            geometry: None,
        }
    }
}

/// Outcome of polling an OCR job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrPoll {
    Pending,
    Succeeded,
    Failed(String),
}

/// One page of block results plus the continuation token, if any.
#[derive(Debug, Clone)]
pub struct OcrPage {
    pub blocks: Vec<Block>,
    pub next_token: Option<String>,
}

/// Client for the external async OCR service.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Submit a job for the given original. Returns the job handle.
    async fn start(&self, source: &BlobRef) -> Result<String>;

    /// Check job state.
    async fn poll(&self, handle: &str) -> Result<OcrPoll>;

    /// Fetch one page of results. `token` of `None` fetches the first page.
    async fn fetch_page(&self, handle: &str, token: Option<&str>) -> Result<OcrPage>;

    /// Best-effort cancellation of a job that is no longer wanted.
    async fn cancel(&self, handle: &str) -> Result<()>;
}

/// Drain every result page of a finished job, in delivery order.
///
/// Follows continuation tokens until none remains; the full set is
/// mandatory, a truncated prefix would corrupt downstream extraction.
pub async fn fetch_all(client: &dyn OcrClient, handle: &str) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = client.fetch_page(handle, token.as_deref()).await?;
        blocks.extend(page.blocks);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(blocks)
}
