//! CLI binary for paper2data.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `inspect` checks a PDF's text layer without any model, and `analyze`
//! runs the whole pipeline locally against in-memory stores.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use paper2data::blob::{source_pdf_key, BlobStore, FsBlobStore};
use paper2data::pipeline::llm::HttpLlmGateway;
use paper2data::pipeline::pdf;
use paper2data::server::{self, AppState};
use paper2data::store::{MemorySessionStore, SessionStore};
use paper2data::{
    run_analysis, run_extraction, ExtractionSession, PipelineConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service against Postgres
  DATABASE_URL=postgres://localhost/papers paper2data serve

  # Check a PDF has a usable text layer (no API key needed)
  paper2data inspect paper.pdf

  # Analyse a paper locally and list its tables
  paper2data analyze paper.pdf

  # Extract every table to ./out/<session>/tables/
  paper2data analyze paper.pdf --extract-all --out out

ENVIRONMENT VARIABLES:
  DATABASE_URL             Postgres connection string (serve only)
  PAPER2DATA_LLM_API_KEY   LLM API key (falls back to OPENAI_API_KEY)
  PAPER2DATA_LLM_BASE_URL  OpenAI-compatible endpoint override
  PAPER2DATA_LLM_MODEL     Model id override
  PAPER2DATA_BLOB_ROOT     Blob storage root directory (default: ./blobs)
"#;

/// Extract tabular data from research-paper PDFs with LLM guidance.
#[derive(Parser, Debug)]
#[command(
    name = "paper2data",
    version,
    about = "Extract tabular data from research-paper PDFs with LLM guidance",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPER2DATA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPER2DATA_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Listen address.
        #[arg(long, env = "PAPER2DATA_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Listen port.
        #[arg(short, long, env = "PAPER2DATA_PORT", default_value_t = 8642)]
        port: u16,
    },

    /// Print a PDF's page count and text-layer statistics. No LLM call.
    Inspect {
        /// Path to the PDF.
        pdf: PathBuf,
    },

    /// Analyse a paper locally (in-memory session, no database).
    Analyze {
        /// Path to the PDF.
        pdf: PathBuf,

        /// Also extract every table the analysis finds.
        #[arg(long)]
        extract_all: bool,

        /// Directory that receives the extracted CSV blobs.
        #[arg(long, default_value = "out")]
        out: PathBuf,

        /// LLM model id.
        #[arg(long, env = "PAPER2DATA_LLM_MODEL")]
        model: Option<String>,

        /// Retry attempts per table.
        #[arg(long, default_value_t = 3)]
        max_retries: u32,

        /// Sampling temperature.
        #[arg(long, default_value_t = 0.1)]
        temperature: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve { host, port } => serve(host, port).await,
        Command::Inspect { pdf } => inspect(pdf),
        Command::Analyze {
            pdf,
            extract_all,
            out,
            model,
            max_retries,
            temperature,
        } => {
            analyze_local(pdf, extract_all, out, model, max_retries, temperature, cli.quiet).await
        }
    }
}

async fn serve(host: String, port: u16) -> Result<()> {
    let config = PipelineConfig::default();
    if std::env::var("DATABASE_URL").is_ok() {
        server::serve_from_env(config, &host, port)
            .await
            .context("server failed")?;
    } else {
        tracing::warn!("DATABASE_URL is not set — serving with in-memory stores (demo mode)");
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::from_env());
        let state = AppState::in_memory(config, blobs);
        server::serve(state, &host, port)
            .await
            .context("server failed")?;
    }
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let paper = pdf::extract_text(&bytes, &path.to_string_lossy())
        .context("PDF text extraction failed")?;

    println!("File:   {}", path.display());
    println!("Pages:  {}", paper.page_count());
    for page in &paper.pages {
        println!(
            "  page {:>3}: {:>7} chars",
            page.page_number,
            page.text.len()
        );
    }
    Ok(())
}

async fn analyze_local(
    path: PathBuf,
    extract_all: bool,
    out: PathBuf,
    model: Option<String>,
    max_retries: u32,
    temperature: f32,
    quiet: bool,
) -> Result<()> {
    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;

    let mut builder = PipelineConfig::builder()
        .max_retries(max_retries)
        .temperature(temperature);
    if let Some(ref model) = model {
        builder = builder.model(model.clone());
    }
    let config = builder.build()?;

    let store = MemorySessionStore::new();
    let blobs = FsBlobStore::new(&out);
    let gateway = HttpLlmGateway::from_env(config.model.as_deref())
        .context("no LLM credentials — set PAPER2DATA_LLM_API_KEY or OPENAI_API_KEY")?;

    // ── Upload ───────────────────────────────────────────────────────────
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.pdf".to_string());
    let mut session = ExtractionSession::new(String::new(), filename);
    session.pdf_path = source_pdf_key(&session.session_id);
    blobs.put(&session.pdf_path, &bytes).await?;
    store.create(&session).await?;

    // ── Analyse ──────────────────────────────────────────────────────────
    let analysis = run_analysis(&store, &blobs, &gateway, &config, &session.session_id)
        .await
        .context("analysis failed")?;

    println!("Session:    {}", session.session_id);
    if let Some(ref title) = analysis.metadata.title {
        println!("Title:      {title}");
    }
    if let Some(ref doi) = analysis.metadata.doi {
        println!("DOI:        {doi}");
    }
    println!("Pages:      {}", analysis.page_count);
    println!("Data types: {}", analysis.data_types.join(", "));
    println!("Tables:     {}", analysis.tables_found);
    for table in &analysis.tables {
        println!(
            "  table {:>3}  p.{:<4} ~{}×{}  {}",
            table.table_number,
            table.page_number,
            table.estimated_rows,
            table.estimated_columns,
            table.caption
        );
    }

    if !extract_all {
        return Ok(());
    }

    // ── Extract every table ──────────────────────────────────────────────
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(analysis.tables.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos}/{len} tables  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_prefix("Extracting");
        bar
    };

    for table in &analysis.tables {
        bar.set_message(format!("table {}", table.table_number));
        match run_extraction(&store, &blobs, &gateway, &config, &session.session_id, table).await {
            Ok(output) => {
                bar.println(format!(
                    "  ✓ table {:>3}  {} rows × {} cols  ({} attempt(s))  {}",
                    table.table_number,
                    output.stats.total_rows,
                    output.stats.total_columns,
                    output.total_attempts,
                    output.csv_path,
                ));
                bar.inc(1);
            }
            Err(e) => {
                bar.println(format!("  ✗ table {:>3}  {e}", table.table_number));
                bar.abandon_with_message("stopped: session failed");
                return Err(e).context("extraction failed");
            }
        }
    }
    bar.finish_with_message("done");
    println!("CSV files under {}/{}/tables/", out.display(), session.session_id);
    Ok(())
}
