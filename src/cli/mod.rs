//! CLI commands for running the pipeline locally.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{write_default_config, Config};
use crate::models::StepName;
use crate::pipeline::{
    BlobEvent, IngressOutcome, IngressTrigger, InsightsResponse, Orchestrator, PipelineContext,
    RedactedAccess,
};
use crate::storage::{self, extension_to_mime, filename_extension, BlobStore};

#[derive(Parser)]
#[command(name = "veti")]
#[command(about = "DD214 document processing and career intelligence pipeline")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and stores
    Init,

    /// Provision an upload URL for a document
    Provision {
        /// Owner identifier
        #[arg(short, long)]
        owner: String,
        /// Original filename
        filename: String,
        /// Content type (inferred from the extension when omitted)
        #[arg(short = 't', long, default_value = "")]
        content_type: String,
    },

    /// Ingest a local file end to end: provision, store, trigger, process
    Ingest {
        /// Path of the PDF or image to process
        file: PathBuf,
        /// Owner identifier
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Run (or resume) processing for a provisioned document
    Process {
        /// Document ID
        document_id: String,
    },

    /// Show recent documents and their pipeline state
    Status {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the full record for a document
    Record {
        /// Document ID
        document_id: String,
    },

    /// Fetch the insight artifact for a document
    Insights {
        /// Document ID
        document_id: String,
    },

    /// Fetch access details for the redacted artifact
    Redacted {
        /// Document ID
        document_id: String,
        /// Print the redacted content itself
        #[arg(long)]
        show: bool,
    },

    /// Delete records and artifacts past their retention deadline
    Sweep,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.data_dir.clone()).context("loading configuration")?;

    match cli.command {
        Commands::Init => init(&config),
        Commands::Provision {
            owner,
            filename,
            content_type,
        } => {
            let ctx = PipelineContext::from_config(config)?;
            let surface = ctx.control_surface();
            let provisioned = surface.provision_upload(&owner, &filename, &content_type)?;
            println!("Document ID: {}", provisioned.document_id);
            println!("Upload key:  {}", provisioned.key);
            println!(
                "Upload URL:  {} (expires in {}s)",
                provisioned.upload_url.url, provisioned.expires_in_secs
            );
            Ok(())
        }
        Commands::Ingest { file, owner } => ingest(config, &file, &owner).await,
        Commands::Process { document_id } => {
            let ctx = Arc::new(PipelineContext::from_config(config)?);
            let orchestrator = Orchestrator::new(ctx);
            let record = orchestrator.run(&document_id).await?;
            println!(
                "{} {}",
                style("status:").bold(),
                record.status.as_str()
            );
            Ok(())
        }
        Commands::Status { limit } => status(config, limit),
        Commands::Record { document_id } => {
            let ctx = PipelineContext::from_config(config)?;
            let record = ctx.control_surface().get_record(&document_id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Insights { document_id } => insights(config, &document_id),
        Commands::Redacted { document_id, show } => redacted(config, &document_id, show).await,
        Commands::Sweep => {
            let ctx = PipelineContext::from_config(config)?;
            let report = ctx.control_surface().sweep_expired(Utc::now()).await?;
            println!(
                "Swept {} records, {} blobs",
                report.records_deleted, report.blobs_deleted
            );
            Ok(())
        }
    }
}

fn init(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let path = write_default_config(&config.data_dir)?;
    // Opening the stores creates their schemas.
    let _ = PipelineContext::from_config(config.clone())?;
    println!("Initialized data directory: {}", config.data_dir.display());
    println!("Config: {}", path.display());
    Ok(())
}

async fn ingest(config: Config, file: &std::path::Path, owner: &str) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    let content_type = infer::get(&bytes)
        .map(|k| k.mime_type().to_string())
        .or_else(|| filename_extension(&filename).map(|e| extension_to_mime(&e).to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let ctx = Arc::new(PipelineContext::from_config(config)?);
    let surface = ctx.control_surface();
    let provisioned = surface.provision_upload(owner, &filename, &content_type)?;
    println!("Document ID: {}", provisioned.document_id);

    // Stand in for the uploader: write the original where the presigned
    // PUT would have.
    ctx.blob
        .put(
            &ctx.config.blob.originals_bucket,
            &provisioned.key,
            &bytes,
            &content_type,
        )
        .await?;

    // The blob-create event starts the execution.
    let trigger = IngressTrigger::new(ctx.records.clone());
    let outcome = trigger.handle_event(&BlobEvent {
        bucket: ctx.config.blob.originals_bucket.clone(),
        key: provisioned.key.clone(),
    })?;
    let document_id = match outcome {
        IngressOutcome::Started { document_id, .. } => document_id,
        IngressOutcome::AlreadyExists { document_id } => {
            println!("Execution already exists for {document_id}, resuming");
            document_id
        }
        IngressOutcome::Skipped { reason } => anyhow::bail!("ingress skipped: {reason}"),
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("processing document...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let orchestrator = Orchestrator::new(ctx.clone());
    let result = orchestrator.run(&document_id).await;
    spinner.finish_and_clear();

    match result {
        Ok(record) => {
            println!(
                "{} {}",
                style("Processing finished:").green().bold(),
                record.status.as_str()
            );
            for step in StepName::ALL {
                let info = record.step(step);
                println!("  {:<14} {}", step.as_str(), info.state.as_str());
            }
            Ok(())
        }
        Err(e) => {
            println!("{} {e}", style("Processing failed:").red().bold());
            Err(e.into())
        }
    }
}

fn status(config: Config, limit: usize) -> anyhow::Result<()> {
    let ctx = PipelineContext::from_config(config)?;
    let records = ctx.records.list_recent(limit)?;
    if records.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!(
        "{:<38} {:<18} {:<22} {}",
        style("DOCUMENT").bold(),
        style("STATUS").bold(),
        style("UPDATED").bold(),
        style("OWNER").bold()
    );
    for record in records {
        println!(
            "{:<38} {:<18} {:<22} {}",
            record.document_id,
            record.status.as_str(),
            record.updated_at.format("%Y-%m-%d %H:%M:%S"),
            record.owner_id
        );
    }
    Ok(())
}

fn insights(config: Config, document_id: &str) -> anyhow::Result<()> {
    let ctx = PipelineContext::from_config(config)?;
    match ctx.control_surface().get_insights(document_id)? {
        InsightsResponse::Available {
            insights,
            generated_at,
            ..
        } => {
            println!("Generated at: {}", generated_at.to_rfc3339());
            println!("{}", serde_json::to_string_pretty(&insights)?);
        }
        InsightsResponse::Generating => println!("Insights are being generated."),
        InsightsResponse::Processing { current_step } => {
            match current_step {
                Some(step) => println!("Document is processing; current step: {}", step.as_str()),
                None => println!("Document is processing."),
            }
        }
        InsightsResponse::Failed { message } => println!("Processing failed: {message}"),
    }
    Ok(())
}

async fn redacted(config: Config, document_id: &str, show: bool) -> anyhow::Result<()> {
    let ctx = PipelineContext::from_config(config)?;
    match ctx.control_surface().get_redacted(document_id)? {
        RedactedAccess::Ready {
            url,
            redacted_at,
            items_redacted,
        } => {
            println!("Redacted URL: {}", url.url);
            if let Some(at) = redacted_at {
                println!("Redacted at:  {}", at.to_rfc3339());
            }
            println!("PII items:    {items_redacted}");
            if show {
                let bytes = ctx
                    .blob
                    .get(
                        &ctx.config.blob.redacted_bucket,
                        &storage::redacted_key(document_id),
                    )
                    .await?;
                println!("\n{}", String::from_utf8_lossy(&bytes));
            }
        }
        RedactedAccess::NotReady => println!("Redacted document not available yet."),
    }
    Ok(())
}
