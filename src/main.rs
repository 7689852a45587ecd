use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use kiroku::har;
use kiroku::output::{self, ArchiveSummary};
use kiroku::record::{self, RecordConfig, RequestSpec};
use kiroku::writer::{self, Separator, WriterOptions};

#[derive(Parser, Debug)]
#[command(name = "kiroku")]
#[command(author, version, about = "Transparent HTTP traffic capture into HAR archives", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output format
    #[arg(short, long, default_value = "pretty", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send requests and capture them into a HAR archive
    Record {
        /// URL(s) to request, in order
        #[arg(required = true)]
        url: Vec<String>,

        /// HTTP method for every request
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header (format: "Header-Name: value")
        #[arg(short = 'H', long)]
        header: Vec<String>,

        /// Request body
        #[arg(short = 'd', long)]
        data: Option<String>,

        /// Archive file (default: <dir>/<timestamp>.har)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for generated archive names
        #[arg(long, env = "KIROKU_OUT_DIR", default_value = "out")]
        dir: PathBuf,

        /// Request timeout in seconds
        #[arg(long, env = "KIROKU_TIMEOUT", default_value = "30")]
        timeout: u64,

        /// Number of concurrent requests
        #[arg(long, default_value = "1")]
        concurrency: usize,

        /// Follow redirects instead of recording the 3xx response
        #[arg(long, default_value = "false")]
        follow_redirects: bool,

        /// Never rewrite bytes already written to the archive
        #[arg(long, default_value = "false")]
        append_only: bool,
    },

    /// Summarize a HAR archive
    Inspect {
        /// HAR file
        #[arg(required = true)]
        input: PathBuf,
    },
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                }),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Record {
            url,
            method,
            header,
            data,
            output,
            dir,
            timeout,
            concurrency,
            follow_redirects,
            append_only,
        } => {
            let headers = header
                .iter()
                .map(|h| record::parse_header(h))
                .collect::<kiroku::Result<Vec<_>>>()
                .context("Invalid --header")?;

            let requests: Vec<RequestSpec> = url
                .into_iter()
                .map(|url| RequestSpec {
                    method: method.clone(),
                    url,
                    headers: headers.clone(),
                    body: data.clone(),
                })
                .collect();

            let path = match output {
                Some(path) => path,
                None => {
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                    dir.join(format!("{}.har", writer::default_file_name()))
                }
            };

            let config = RecordConfig {
                timeout: Duration::from_secs(timeout),
                concurrency: concurrency.max(1),
                follow_redirects,
                writer: WriterOptions {
                    separator: if append_only {
                        Separator::Deferred
                    } else {
                        Separator::Rewind
                    },
                    ..WriterOptions::default()
                },
            };

            tracing::info!(archive = %path.display(), requests = requests.len(), "recording");
            let session = record::record(&requests, &path, config).await?;

            match args.format {
                OutputFormat::Pretty => output::print_record_pretty(&session),
                OutputFormat::Json => println!("{}", output::print_record_json(&session)),
                OutputFormat::Compact => println!("{}", output::print_record_compact(&session)),
            }
        }
        Command::Inspect { input } => {
            let archive = har::load_har(&input)
                .with_context(|| format!("Failed to read archive {}", input.display()))?;
            let summary = ArchiveSummary::from_har(input.display().to_string(), &archive);

            match args.format {
                OutputFormat::Pretty => output::print_summary_pretty(&summary),
                OutputFormat::Json => println!("{}", output::print_summary_json(&summary)),
                OutputFormat::Compact => println!("{}", output::print_summary_compact(&summary)),
            }
        }
    }

    Ok(())
}
