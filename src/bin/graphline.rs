//! Graphline CLI: stream records into one atomic graph revision.
//!
//! Usage:
//!   graphline write --config run.yaml [--input records.jsonl] [--dry-run] [--error-policy fail]
//!   graphline check --config run.yaml
//!
//! Checkpoint lines are echoed to stdout once the revision commits. Logs go
//! to stderr; `GRAPHLINE_LOG_FORMAT=json` switches them to JSON.

use clap::{Parser, Subcommand};
use graphline::{ErrorPolicy, RunConfig};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "graphline",
    version,
    about = "Correlating stream-to-graph ingestion with atomic revisions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest records and commit them as one revision
    Write {
        /// Path to the run configuration (YAML)
        #[arg(long)]
        config: PathBuf,
        /// Read records from a file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
        /// Do everything except write to the store
        #[arg(long)]
        dry_run: bool,
        /// Override the configured error policy (skip or fail)
        #[arg(long)]
        error_policy: Option<ErrorPolicy>,
    },
    /// Validate a configuration without reading input
    Check {
        /// Path to the run configuration (YAML)
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing() {
    let log_format = std::env::var("GRAPHLINE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "graphline=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn open_input(path: Option<&Path>) -> std::io::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

async fn cmd_write(
    config_path: &Path,
    input: Option<&Path>,
    dry_run: bool,
    error_policy: Option<ErrorPolicy>,
) -> i32 {
    let mut config = match RunConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    config.dry_run |= dry_run;
    if let Some(policy) = error_policy {
        config.error_policy = policy;
    }

    let pipeline = match config.build_pipeline() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let reader = match open_input(input).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: failed to open input: {}", e);
            return 1;
        }
    };

    match pipeline.run(reader).await {
        Ok(report) => {
            for checkpoint in &report.checkpoints {
                println!("{}", checkpoint);
            }
            0
        }
        Err(failure) => {
            eprintln!(
                "Error: {} ({} of {} records processed, nothing committed)",
                failure.error, failure.stats.records_processed, failure.stats.records_read
            );
            1
        }
    }
}

fn cmd_check(config_path: &Path) -> i32 {
    let config = match RunConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!(
        "Configuration OK: {} stream mapping(s), fallback {}, policy {}",
        config.transforms.len(),
        if config.fallback.is_some() { "set" } else { "unset" },
        config.error_policy
    );
    for spec in &config.transforms {
        if let Some(stream) = &spec.stream {
            println!("  {}", stream);
        }
    }
    0
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Write {
            config,
            input,
            dry_run,
            error_policy,
        } => cmd_write(&config, input.as_deref(), dry_run, error_policy).await,
        Commands::Check { config } => cmd_check(&config),
    };
    std::process::exit(code);
}
