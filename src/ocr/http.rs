//! HTTP client for the remote async OCR service.
//!
//! The service exposes a small job API: `POST /jobs` submits a document
//! reference, `GET /jobs/{id}` reports state, `GET /jobs/{id}/blocks`
//! pages through results with a continuation token, and
//! `DELETE /jobs/{id}` cancels.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Block, OcrClient, OcrError, OcrPage, OcrPoll, Result};
use crate::models::BlobRef;

pub struct HttpOcrClient {
    endpoint: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    bucket: &'a str,
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlocksResponse {
    #[serde(rename = "Blocks")]
    blocks: Vec<Block>,
    #[serde(rename = "NextToken", default)]
    next_token: Option<String>,
}

impl HttpOcrClient {
    pub fn new(endpoint: &str, request_timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OcrError::Connection(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn check_status(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(OcrError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn start(&self, source: &BlobRef) -> Result<String> {
        let url = format!("{}/jobs", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&StartRequest {
                bucket: &source.bucket,
                key: &source.key,
            })
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;
        let resp = self.check_status(resp).await?;
        let body: StartResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;
        debug!(job_id = %body.job_id, key = %source.key, "submitted OCR job");
        Ok(body.job_id)
    }

    async fn poll(&self, handle: &str) -> Result<OcrPoll> {
        let url = format!("{}/jobs/{}", self.endpoint, handle);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;
        let resp = self.check_status(resp).await?;
        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;
        match body.status.as_str() {
            "pending" | "in_progress" | "queued" => Ok(OcrPoll::Pending),
            "succeeded" => Ok(OcrPoll::Succeeded),
            "failed" => Ok(OcrPoll::Failed(
                body.reason.unwrap_or_else(|| "unspecified".to_string()),
            )),
            other => Err(OcrError::Parse(format!("unknown job status: {other}"))),
        }
    }

    async fn fetch_page(&self, handle: &str, token: Option<&str>) -> Result<OcrPage> {
        let url = format!("{}/jobs/{}/blocks", self.endpoint, handle);
        let mut request = self.client.get(&url);
        if let Some(token) = token {
            request = request.query(&[("next_token", token)]);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;
        let resp = self.check_status(resp).await?;
        let body: BlocksResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;
        Ok(OcrPage {
            blocks: body.blocks,
            next_token: body.next_token,
        })
    }

    async fn cancel(&self, handle: &str) -> Result<()> {
        let url = format!("{}/jobs/{}", self.endpoint, handle);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;
        self.check_status(resp).await?;
        Ok(())
    }
}
