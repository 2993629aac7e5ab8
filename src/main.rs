//! `docsift` command line: parse one document and print the response
//! envelope as JSON on stdout.
//!
//! ```bash
//! docsift report.pdf
//! docsift --tables-only budget.xlsx
//! RUST_LOG=docsift=debug docsift scan.pdf
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use docsift::config::{self, AppConfig};
use docsift::pipeline::processor::DocumentProcessor;

/// Command-line arguments
#[derive(Parser)]
#[command(name = config::APP_NAME, version = config::APP_VERSION)]
#[command(about = "Extract text, metadata and tables from PDF, Word and spreadsheet documents")]
struct Args {
    /// Document to parse
    path: PathBuf,

    /// Only extract tables
    #[arg(short, long)]
    tables_only: bool,

    /// Skip table extraction (overrides DOCSIFT_SKIP_TABLES)
    #[arg(long, conflicts_with = "tables_only")]
    skip_tables: bool,

    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    docsift::init_tracing();

    let mut config = AppConfig::from_env();
    if args.skip_tables {
        config.pipeline.skip_table_extraction = true;
    }
    tracing::info!(version = config::APP_VERSION, path = %args.path.display(), "docsift starting");

    let processor = DocumentProcessor::from_config(&config);
    let (success, json) = if args.tables_only {
        let response = processor.process_tables(&args.path);
        (response.success, render(&response, args.compact))
    } else {
        let response = processor.process(&args.path);
        (response.success, render(&response, args.compact))
    };

    match json {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            return ExitCode::FAILURE;
        }
    }
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn render<T: serde::Serialize>(value: &T, compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}
