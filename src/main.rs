use anyhow::Context;
use clap::{Parser, Subcommand};
use omics_oracle::pipeline::{PublicationPipeline, SearchOptions};
use omics_oracle::{Error, SearchConfig, SourceId};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_ALL_SOURCES_FAILED: u8 = 3;
const EXIT_CANCELLED: u8 = 4;

#[derive(Parser)]
#[command(
    name = "omics-oracle",
    version,
    about = "Biomedical literature discovery engine"
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search publication sources and print the ranked result as JSON
    Search {
        /// The natural-language query
        #[arg(long)]
        query: String,

        /// Comma-separated source list (pubmed,scholar,europe_pmc,
        /// semantic_scholar,openalex); defaults to the configured
        /// toggles
        #[arg(long, value_delimiter = ',')]
        source: Vec<String>,

        /// Maximum results per source
        #[arg(long)]
        max_results: Option<u32>,

        /// Bypass the result cache
        #[arg(long)]
        no_cache: bool,

        /// Resolve full text and download PDFs for the top results
        #[arg(long)]
        download_pdfs: bool,

        /// Write the JSON result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr));
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn apply_source_selection(config: &mut SearchConfig, selection: &[String]) -> Result<(), Error> {
    if selection.is_empty() {
        return Ok(());
    }
    config.enable_pubmed = false;
    config.enable_scholar = false;
    config.enable_europe_pmc = false;
    config.enable_semantic_scholar = false;
    config.enable_openalex = false;

    for name in selection {
        match name.parse::<SourceId>()? {
            SourceId::Pubmed => config.enable_pubmed = true,
            SourceId::Scholar => config.enable_scholar = true,
            SourceId::EuropePmc => config.enable_europe_pmc = true,
            SourceId::SemanticScholar => config.enable_semantic_scholar = true,
            SourceId::OpenAlex => config.enable_openalex = true,
            SourceId::Unpaywall => {
                return Err(Error::InvalidInput {
                    field: "source".to_string(),
                    reason: "unpaywall is an enrichment source, not a search source".to_string(),
                })
            }
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let Command::Search {
        query,
        source,
        max_results,
        no_cache,
        download_pdfs,
        output,
    } = cli.command;

    let mut config = SearchConfig::load(cli.config.as_deref())?;
    apply_source_selection(&mut config, &source)?;
    if let Some(max_results) = max_results {
        for source in SourceId::ALL {
            config.sources.get_mut(source).max_results = max_results;
        }
    }
    if no_cache {
        config.enable_cache = false;
    }
    if download_pdfs {
        config.enable_full_text_resolve = true;
        config.enable_pdf_download = true;
    }
    config.validate()?;

    let pipeline = PublicationPipeline::new(config)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling search");
            signal_token.cancel();
        }
    });

    let result = pipeline
        .search(
            &query,
            SearchOptions {
                cancel: Some(cancel),
                datasets: Vec::new(),
            },
        )
        .await?;

    info!(
        "Found {} publications ({} candidates) in {} ms",
        result.publications.len(),
        result.total_found,
        result.timings.total_ms
    );

    let rendered = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => tokio::fs::write(&path, rendered)
            .await
            .with_context(|| format!("writing result to {}", path.display()))?,
        None => println!("{rendered}"),
    }

    let every_source_failed = result.publications.is_empty()
        && !result.failures.is_empty()
        && result.per_source_counts.values().all(|&count| count == 0);
    if every_source_failed {
        return Ok(EXIT_ALL_SOURCES_FAILED);
    }
    Ok(EXIT_OK)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            match e.downcast_ref::<Error>() {
                Some(Error::InvalidInput { .. } | Error::Config(_)) => {
                    ExitCode::from(EXIT_INVALID_ARGS)
                }
                Some(Error::Cancelled | Error::DeadlineExceeded) => {
                    ExitCode::from(EXIT_CANCELLED)
                }
                _ => ExitCode::FAILURE,
            }
        }
    }
}
