//! Configuration management for vetintel.
//!
//! Settings come from `config.toml` in the data directory with
//! environment-variable overrides for deployment-specific values.
//! Every section carries serde defaults; validation of required values
//! happens once at startup and a missing value is fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default retention for processing records and insight rows.
pub const DEFAULT_TTL_DAYS: i64 = 90;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    MissingValue(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Blob store buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Bucket holding uploaded originals and OCR staging artifacts.
    #[serde(default = "default_originals_bucket")]
    pub originals_bucket: String,
    /// Bucket holding redacted text artifacts.
    #[serde(default = "default_redacted_bucket")]
    pub redacted_bucket: String,
}

fn default_originals_bucket() -> String {
    "vetintel-dd214-secure".to_string()
}
fn default_redacted_bucket() -> String {
    "vetintel-dd214-redacted".to_string()
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            originals_bucket: default_originals_bucket(),
            redacted_bucket: default_redacted_bucket(),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Logical table name; also names the sqlite database file.
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

fn default_table_name() -> String {
    "dd214_processing".to_string()
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
        }
    }
}

/// Orchestrator timing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between OCR job polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Ceiling on how long an OCR job may stay pending before the stage
    /// times out.
    #[serde(default = "default_ocr_ceiling")]
    pub ocr_pending_ceiling_seconds: u64,
    /// Wall-clock budget for one whole execution.
    #[serde(default = "default_execution_budget")]
    pub execution_budget_seconds: u64,
    /// Transient-failure retries per stage before escalating.
    #[serde(default = "default_stage_retries")]
    pub max_stage_retries: u32,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_ocr_ceiling() -> u64 {
    300
}
fn default_execution_budget() -> u64 {
    900
}
fn default_stage_retries() -> u32 {
    2
}
fn default_retry_base_ms() -> u64 {
    500
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            ocr_pending_ceiling_seconds: default_ocr_ceiling(),
            execution_budget_seconds: default_execution_budget(),
            max_stage_retries: default_stage_retries(),
            retry_base_delay_ms: default_retry_base_ms(),
        }
    }
}

/// OCR service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Endpoint of the remote OCR service.
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
    /// Maximum pages to fetch; 0 means unbounded. Jobs above 50 pages log
    /// a warning either way.
    #[serde(default)]
    pub max_pages: u32,
    /// Per-request timeout for OCR service calls.
    #[serde(default = "default_ocr_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_ocr_endpoint() -> String {
    "http://localhost:9400".to_string()
}
fn default_ocr_timeout() -> u64 {
    30
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ocr_endpoint(),
            max_pages: 0,
            request_timeout_seconds: default_ocr_timeout(),
        }
    }
}

/// Per-variant override of inference parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantOverride {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
}

/// LLM transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier passed through to the converse endpoint.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Converse API endpoint.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call deadline.
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_seconds: u64,
    /// Named prompt-variant overrides, e.g. `[llm.variants.legacy_report]`.
    #[serde(default)]
    pub variants: BTreeMap<String, VariantOverride>,
}

fn default_model_id() -> String {
    "nova-lite-v1".to_string()
}
fn default_llm_endpoint() -> String {
    "http://localhost:9500".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            endpoint: default_llm_endpoint(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            request_timeout_seconds: default_llm_timeout(),
            variants: BTreeMap::new(),
        }
    }
}

/// PII classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    /// Whether to consult the external entity classifier at all.
    #[serde(default)]
    pub classifier_enabled: bool,
    /// Bound on waiting for an async classifier job before falling back to
    /// the default DD214 finding set.
    #[serde(default = "default_classifier_timeout")]
    pub classifier_timeout_seconds: u64,
    /// Classifier endpoint; required when the classifier is enabled.
    #[serde(default)]
    pub classifier_endpoint: Option<String>,
}

fn default_classifier_timeout() -> u64 {
    120
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            classifier_enabled: false,
            classifier_timeout_seconds: default_classifier_timeout(),
            classifier_endpoint: None,
        }
    }
}

/// Retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_ttl_days() -> i64 {
    DEFAULT_TTL_DAYS
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub record: RecordConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pii: PiiConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration for the given data directory.
    ///
    /// Reads `config.toml` if present, applies environment overrides, and
    /// validates. Returns `ConfigError` for anything that would leave a
    /// worker unable to run.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = resolve_data_dir(data_dir);
        let config_path = data_dir.join("config.toml");

        let mut config: Config = if config_path.exists() {
            let raw = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                path: config_path.clone(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: config_path.clone(),
                source,
            })?
        } else {
            Config::default()
        };

        config.data_dir = data_dir;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for values that vary per deployment.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VETINTEL_ORIGINALS_BUCKET") {
            self.blob.originals_bucket = v;
        }
        if let Ok(v) = std::env::var("VETINTEL_REDACTED_BUCKET") {
            self.blob.redacted_bucket = v;
        }
        if let Ok(v) = std::env::var("VETINTEL_TABLE_NAME") {
            self.record.table_name = v;
        }
        if let Ok(v) = std::env::var("VETINTEL_MODEL_ID") {
            self.llm.model_id = v;
        }
        if let Ok(v) = std::env::var("VETINTEL_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Ok(v) = std::env::var("VETINTEL_OCR_ENDPOINT") {
            self.ocr.endpoint = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blob.originals_bucket.is_empty() {
            return Err(ConfigError::MissingValue("blob.originals_bucket"));
        }
        if self.blob.redacted_bucket.is_empty() {
            return Err(ConfigError::MissingValue("blob.redacted_bucket"));
        }
        if self.record.table_name.is_empty() {
            return Err(ConfigError::MissingValue("record.table_name"));
        }
        if self.llm.model_id.is_empty() {
            return Err(ConfigError::MissingValue("llm.model_id"));
        }
        if self.pii.classifier_enabled && self.pii.classifier_endpoint.is_none() {
            return Err(ConfigError::MissingValue("pii.classifier_endpoint"));
        }
        if self.orchestrator.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.poll_interval_seconds must be positive".to_string(),
            ));
        }
        if self.retention.ttl_days <= 0 {
            return Err(ConfigError::Invalid(
                "retention.ttl_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Root directory for the filesystem blob store.
    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Path of the sqlite database backing the record store.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.record.table_name))
    }
}

/// Resolve the data directory: explicit flag, then environment, then the
/// platform data dir.
fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Ok(dir) = std::env::var("VETINTEL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vetintel")
}

/// Write a default config file if none exists. Used by `veti init`.
pub fn write_default_config(data_dir: &Path) -> Result<PathBuf, ConfigError> {
    let path = data_dir.join("config.toml");
    if !path.exists() {
        let default = Config::default();
        let rendered = toml::to_string_pretty(&default)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        fs::create_dir_all(data_dir).map_err(|source| ConfigError::Read {
            path: data_dir.to_path_buf(),
            source,
        })?;
        fs::write(&path, rendered).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
    }
    Ok(path)
}
