use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use knowledge_common::{ArticleRecord, IngestError, Settings};
use knowledge_ingest::Pipeline;

#[derive(Parser)]
#[command(name = "knowledge", about = "Fetch, classify and archive web articles")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch an article URL, classify it and save it.
    Ingest {
        url: String,
        /// Give up after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Classify and save article text supplied by hand ("-" reads stdin).
    Submit {
        #[arg(long)]
        title: String,
        #[arg(long)]
        url: Option<String>,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(Cli::parse()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            print_line(json!({ "type": "error", "kind": "setup", "message": format!("{e:#}") }));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("knowledge=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::from_env()?;
    settings.log_redacted();

    let pipeline = Pipeline::from_settings(&settings).await?;

    let result = match cli.command {
        Command::Ingest { url, deadline_secs } => {
            info!(url = %url, "Ingesting");
            match deadline_secs {
                Some(secs) => pipeline.ingest_with_deadline(&url, Duration::from_secs(secs)).await,
                None => pipeline.ingest(&url).await,
            }
        }
        Command::Submit { title, url, file } => {
            let body = read_submission(&file)?;
            pipeline.ingest_text(&title, &body, url.as_deref()).await
        }
    };

    Ok(report(result))
}

fn read_submission(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("Failed to read submission from stdin")?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// One JSON line on stdout per run.
fn report(result: Result<ArticleRecord, IngestError>) -> ExitCode {
    match result {
        Ok(record) => {
            print_line(json!({
                "type": "message",
                "content": format!("Saved \"{}\" as {} ({})", record.title, record.category, record.keywords),
                "record": record,
            }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.remediation() {
                Some(remediation) => print_line(json!({
                    "type": "remediation",
                    "kind": e.kind(),
                    "content": remediation,
                })),
                None => print_line(json!({
                    "type": "error",
                    "kind": e.kind(),
                    "message": e.to_string(),
                })),
            }
            ExitCode::FAILURE
        }
    }
}

fn print_line(value: serde_json::Value) {
    println!("{value}");
}
