mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use runbox_common::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "runbox-cli")]
#[command(about = "Runbox CLI - Submit code to the sandbox queue and inspect results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit source code for execution
    Submit {
        /// Language name (e.g., python, cpp, java)
        #[arg(short, long)]
        language: String,

        /// Source file to run, or "-" for stdin
        #[arg(short, long, conflicts_with = "code")]
        file: Option<PathBuf>,

        /// Inline source code
        #[arg(short, long)]
        code: Option<String>,

        /// Execution timeout in milliseconds (defaults to DEFAULT_TIMEOUT_MS)
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Return the job id immediately instead of waiting for the result
        #[arg(long)]
        no_wait: bool,
    },

    /// Show the state of a submitted job
    Poll {
        /// Job id returned by submit
        #[arg(short, long)]
        job_id: String,

        /// Wait up to this many milliseconds for the job to finish
        #[arg(short, long)]
        wait_ms: Option<u64>,
    },

    /// List registered languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let registry = commands::load_registry(&config)?;

    let ok = match cli.command {
        Commands::Submit {
            language,
            file,
            code,
            timeout_ms,
            no_wait,
        } => {
            let source = commands::read_source(file.as_deref(), code.as_deref())?;
            let submitter = commands::connect(&config, registry).await?;
            commands::submit(&submitter, &language, &source, timeout_ms, !no_wait).await?
        }
        Commands::Poll { job_id, wait_ms } => {
            let submitter = commands::connect(&config, registry).await?;
            commands::poll(&submitter, &job_id, wait_ms).await?
        }
        Commands::Languages => {
            commands::list_languages(&registry)?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
