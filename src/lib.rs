//! vetintel - DD214 document processing and career intelligence pipeline.
//!
//! Moves one veteran separation document through ingest, OCR, field
//! extraction, PII detection, redaction, and LLM-backed insight
//! generation, with a durable per-document record tracking every step.

pub mod cli;
pub mod config;
pub mod extraction;
pub mod insights;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod pii;
pub mod pipeline;
pub mod repository;
pub mod storage;
