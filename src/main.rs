//! CLI entry point for the fetcher tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fetcher_core::url::maybe_prepend_scheme;
use fetcher_core::{ExitStatus, Outcome, Session};
use tracing::{debug, error, info};

mod app_config;
mod cli;
mod progress_bar;

use app_config::load_default_file_config;
use cli::Args;
use progress_bar::BarProgress;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    match run(args).await {
        Ok(status) => exit_code(status),
        Err(err) => {
            eprintln!("fetcher: {err:#}");
            exit_code(ExitStatus::Generic)
        }
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    ExitCode::from(u8::try_from(status.code()).unwrap_or(1))
}

async fn run(args: Args) -> Result<ExitStatus> {
    let loaded = load_default_file_config()?;
    let file_config = loaded.config.as_ref();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .and_then(|config| config.verbosity)
                .map_or("info", |verbosity| verbosity.filter()),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(urls = ?args.urls, config = ?loaded.path, "CLI arguments parsed");
    let options = args.to_options(file_config)?;

    let mut session = Session::new(options);
    if !args.quiet && !args.no_progress && io::stderr().is_terminal() {
        session = session.with_progress(Arc::new(BarProgress::new()));
    }

    let mut status = ExitStatus::Success;
    for raw in &args.urls {
        let url = maybe_prepend_scheme(raw).unwrap_or_else(|| raw.clone());
        match session.retrieve(&url).await {
            Ok(outcome) => report(&url, &outcome),
            Err(err) => {
                error!(url = %url, error = %err, "retrieval failed");
                status = status.worst(err.exit_status());
            }
        }
    }
    session.close().await;

    let stats = session.stats();
    info!(
        connects = stats.connects,
        reuses = stats.reuses,
        status = status.code(),
        "done"
    );
    Ok(status)
}

fn report(url: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Retrieved {
            local_file,
            len,
            received,
            elapsed,
            status,
        } => info!(
            url,
            status,
            len,
            received,
            elapsed_ms = elapsed.as_millis(),
            file = ?local_file,
            "saved"
        ),
        Outcome::Unneeded { local_file } => info!(url, file = ?local_file, "already up to date"),
        Outcome::NewLocation { location, .. } => info!(url, %location, "redirect not followed"),
        Outcome::RemoteExists { status } => info!(url, status, "remote file exists"),
    }
}
