//! Blob storage for document content and pipeline artifacts.
//!
//! Objects are addressed by `{bucket, key}`. The key layout is canonical
//! and consumers depend on it — the ingress trigger parses upload keys to
//! recover document identity, and every stage derives its artifact keys
//! from the document id alone so re-runs overwrite instead of duplicating.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Upload extensions accepted by the provisioner and the key parser.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];

/// Ceiling on presigned GET lifetime (1 hour).
pub const MAX_GET_TTL_SECS: u64 = 3600;
/// Ceiling on presigned PUT lifetime (5 minutes).
pub const MAX_PUT_TTL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Key of an uploaded original:
/// `uploads/{owner_id}/{YYYYMMDD_HHMMSS}_{document_id}.{ext}`.
pub fn upload_key(owner_id: &str, document_id: &str, extension: &str, at: DateTime<Utc>) -> String {
    format!(
        "uploads/{}/{}_{}.{}",
        owner_id,
        at.format("%Y%m%d_%H%M%S"),
        document_id,
        extension
    )
}

/// Key of the complete paginated OCR block dump.
pub fn full_results_key(document_id: &str) -> String {
    format!("textract-results/{}/full_results.json", document_id)
}

/// Key of the convenience plain-text dump.
pub fn full_text_key(document_id: &str) -> String {
    format!("textract-results/{}/full_text.txt", document_id)
}

/// Key of the extraction summary (fields + stats + preview).
pub fn extraction_summary_key(document_id: &str) -> String {
    format!("textract-results/{}/extraction_summary.json", document_id)
}

/// Key of the redacted text artifact.
pub fn redacted_key(document_id: &str) -> String {
    format!("redacted/{}/dd214_redacted.txt", document_id)
}

/// Identity recovered from an upload key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadKey {
    pub owner_id: String,
    pub document_id: String,
    pub extension: String,
}

/// Parse a canonical upload key back into owner and document identity.
///
/// Returns `InvalidKey` for anything that does not match the layout, so
/// the ingress trigger can log and skip stray objects.
pub fn parse_upload_key(key: &str) -> Result<UploadKey> {
    let mut parts = key.split('/');
    if parts.next() != Some("uploads") {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    let owner_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BlobError::InvalidKey(key.to_string()))?;
    let filename = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BlobError::InvalidKey(key.to_string()))?;
    if parts.next().is_some() {
        return Err(BlobError::InvalidKey(key.to_string()));
    }

    let (stem, extension) = filename
        .rsplit_once('.')
        .ok_or_else(|| BlobError::InvalidKey(key.to_string()))?;
    if !ALLOWED_EXTENSIONS.contains(&extension) {
        return Err(BlobError::InvalidKey(key.to_string()));
    }

    // Stem layout: {YYYYMMDD}_{HHMMSS}_{document_id}; the id itself may
    // contain underscores or dashes, so split off the two timestamp parts.
    let mut segments = stem.splitn(3, '_');
    let date = segments.next().unwrap_or_default();
    let time = segments.next().unwrap_or_default();
    let document_id = segments.next().unwrap_or_default();
    let timestamp_ok = date.len() == 8
        && time.len() == 6
        && date.chars().all(|c| c.is_ascii_digit())
        && time.chars().all(|c| c.is_ascii_digit());
    if !timestamp_ok || document_id.is_empty() {
        return Err(BlobError::InvalidKey(key.to_string()));
    }

    Ok(UploadKey {
        owner_id: owner_id.to_string(),
        document_id: document_id.to_string(),
        extension: extension.to_string(),
    })
}

/// Object metadata returned by `head`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    pub content_type: String,
    pub byte_size: u64,
    pub sha256: String,
    pub stored_at: DateTime<Utc>,
}

/// A time-limited signed URL for direct object access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Content store addressed by `{bucket, key}`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn head(&self, bucket: &str, key: &str) -> Result<BlobMeta>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
    /// Presigned read URL; TTL clamped to one hour.
    fn presign_get(&self, bucket: &str, key: &str, ttl_secs: u64) -> PresignedUrl;
    /// Presigned write URL; TTL clamped to five minutes.
    fn presign_put(&self, bucket: &str, key: &str, ttl_secs: u64) -> PresignedUrl;
}

/// Filesystem-backed blob store.
///
/// Objects live under `{root}/{bucket}/{key}` with a JSON metadata sidecar
/// carrying content type and SHA-256 hash. Presigned URLs are HMAC-style
/// tokens over the object path and expiry.
pub struct FsBlobStore {
    root: PathBuf,
    secret: Vec<u8>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        // Signing secret persists alongside the store so URLs issued before
        // a restart still verify.
        let secret_path = root.join(".presign-secret");
        let secret = if secret_path.exists() {
            std::fs::read(&secret_path)?
        } else {
            let seed = format!("{}|{}", uuid::Uuid::new_v4(), Utc::now().timestamp_nanos_opt().unwrap_or_default());
            let secret = Sha256::digest(seed.as_bytes()).to_vec();
            std::fs::write(&secret_path, &secret)?;
            secret
        };

        Ok(Self { root, secret })
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.object_path(bucket, key);
        let file_name = path
            .file_name()
            .map(|n| format!("{}.meta.json", n.to_string_lossy()))
            .unwrap_or_else(|| ".meta.json".to_string());
        path.set_file_name(file_name);
        path
    }

    fn sign(&self, method: &str, bucket: &str, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(method.as_bytes());
        hasher.update(bucket.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(expires.to_be_bytes());
        URL_SAFE_NO_PAD.encode(&hasher.finalize()[..16])
    }

    fn presign(&self, method: &str, bucket: &str, key: &str, ttl_secs: u64) -> PresignedUrl {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_secs as i64);
        let expires = expires_at.timestamp();
        let sig = self.sign(method, bucket, key, expires);
        PresignedUrl {
            url: format!("blob://{}/{}?method={}&expires={}&sig={}", bucket, key, method, expires, sig),
            expires_at,
        }
    }

    /// Verify a presigned URL produced by this store.
    pub fn verify_presigned(&self, url: &str) -> bool {
        let Some(rest) = url.strip_prefix("blob://") else {
            return false;
        };
        let Some((path, query)) = rest.split_once('?') else {
            return false;
        };
        let Some((bucket, key)) = path.split_once('/') else {
            return false;
        };
        let mut method = "";
        let mut expires = 0i64;
        let mut sig = "";
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("method", v)) => method = v,
                Some(("expires", v)) => expires = v.parse().unwrap_or(0),
                Some(("sig", v)) => sig = v,
                _ => {}
            }
        }
        if expires < Utc::now().timestamp() {
            return false;
        }
        self.sign(method, bucket, key, expires) == sig
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bucket: &str, key: &str, body: &[u8], content_type: &str) -> Result<()> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;

        let meta = BlobMeta {
            content_type: content_type.to_string(),
            byte_size: body.len() as u64,
            sha256: hex::encode(Sha256::digest(body)),
            stored_at: Utc::now(),
        };
        std::fs::write(self.meta_path(bucket, key), serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key);
        match std::fs::read(&path) {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<BlobMeta> {
        let path = self.meta_path(bucket, key);
        match std::fs::read(&path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let meta = self.meta_path(bucket, key);
        if meta.exists() {
            std::fs::remove_file(&meta)?;
        }
        Ok(())
    }

    fn presign_get(&self, bucket: &str, key: &str, ttl_secs: u64) -> PresignedUrl {
        self.presign("get", bucket, key, ttl_secs.min(MAX_GET_TTL_SECS))
    }

    fn presign_put(&self, bucket: &str, key: &str, ttl_secs: u64) -> PresignedUrl {
        self.presign("put", bucket, key, ttl_secs.min(MAX_PUT_TTL_SECS))
    }
}

/// Compute the SHA-256 hash of blob content as lowercase hex.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Map an upload extension to its MIME type.
pub fn extension_to_mime(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Detect the extension from a filename, lowercased.
pub fn filename_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}
