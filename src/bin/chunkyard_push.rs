//! chunkyard-push -- upload a file to a chunkyard server.
//!
//! Files at or below the chunking threshold are sent in one request; larger
//! files are split into chunks, sent in parallel with per-chunk retry, and
//! finalized once every chunk is acknowledged.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use chunkyard::client::{ClientSettings, HttpTransport, Orchestrator, UploadMode};
use chunkyard::config::{load_config, ClientConfig};

#[derive(Parser, Debug)]
#[command(name = "chunkyard-push", version, about = "Upload a file to a chunkyard server")]
struct Cli {
    /// File to upload.
    file: PathBuf,

    /// YAML configuration file; only the `client` section is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server base URL (overrides config).
    #[arg(short, long)]
    server: Option<String>,

    /// Name to store the file under (defaults to the file's name).
    #[arg(long)]
    name: Option<String>,

    /// Declared content type.
    #[arg(long = "type", default_value = "application/octet-stream")]
    content_type: String,

    /// Chunk size in bytes (overrides config).
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Maximum chunks in flight (overrides config).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per chunk (overrides config).
    #[arg(long)]
    retries: Option<u32>,

    /// Hide the progress bar.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut client: ClientConfig = match &cli.config {
        Some(path) => load_config(path)?.client,
        None => ClientConfig::default(),
    };
    if let Some(server) = cli.server {
        client.server_url = server;
    }
    if let Some(chunk_size) = cli.chunk_size {
        client.chunk_size = chunk_size;
    }
    if let Some(concurrency) = cli.concurrency {
        client.concurrency = concurrency;
    }
    if let Some(retries) = cli.retries {
        client.max_retries = retries;
    }

    let file_name = match cli.name {
        Some(name) => name,
        None => cli
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("cannot derive a file name; pass --name")?,
    };

    let transport = Arc::new(HttpTransport::new(&client.server_url));
    let orchestrator = Orchestrator::new(transport, ClientSettings::from(&client));

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")?
                .progress_chars("#>-"),
        );
        bar
    };

    let report = orchestrator
        .upload_file(&cli.file, &file_name, &cli.content_type, |p| {
            bar.set_length(u64::from(p.total));
            bar.set_position(u64::from(p.acknowledged));
        })
        .await
        .with_context(|| format!("uploading {}", cli.file.display()))?;
    bar.finish_and_clear();

    let artifact = report.artifact;
    match report.mode {
        UploadMode::SingleShot => println!("Uploaded {} in one request", artifact.original_name),
        UploadMode::Chunked {
            session_id,
            total_chunks,
        } => println!(
            "Uploaded {} in {} chunks (session {})",
            artifact.original_name, total_chunks, session_id
        ),
    }
    println!("  path:   {}", artifact.path);
    println!("  size:   {} bytes", artifact.size);
    println!("  sha256: {}", artifact.sha256);

    Ok(())
}
