//! CLI entry point for the parallel logical-backup client.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docdump_core::cancel::CancellationToken;
use docdump_core::directory::FsDirectorySink;
use docdump_core::interfaces::{Maskings, NoMaskings};
use docdump_core::options::Options;
use docdump_core::stats::Stats;
use docdump_core::{run_dump_full, DumpError};
use tracing::{debug, error, info};

mod cli;
mod maskings;

use cli::Args;
use maskings::FileMaskings;

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // spec.md §7 "User-visible behavior": print the first error's
            // message and exit non-zero.
            error!(error = %e, "dump failed");
            eprintln!("docdump: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let progress = args.progress;
    let raw = args
        .into_raw_options()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let options = Options::from_raw(raw).map_err(|e| anyhow::anyhow!("{e}"))?;

    info!(server = %options.server_url, output = %options.output_path.display(), "starting dump");

    let directory: Arc<dyn docdump_core::interfaces::DirectorySink> =
        Arc::new(FsDirectorySink::new(options.output_path.clone()));

    let maskings: Arc<dyn Maskings + Send + Sync> = match &options.maskings_file {
        Some(path) => Arc::new(
            FileMaskings::load(path).with_context(|| format!("loading maskings file {}", path.display()))?,
        ),
        None => Arc::new(NoMaskings),
    };

    let stats = Arc::new(Stats::new());
    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone());

    let progress_handle = progress.then(|| spawn_progress_reporter(Arc::clone(&stats)));

    let outcome = run_dump_full(options, directory, maskings, Arc::clone(&stats), Some(cancel));

    if let Some((bar, done)) = progress_handle {
        done.store(true, Ordering::Relaxed);
        bar.finish_and_clear();
    }

    let outcome = outcome?;

    info!(
        collections = outcome.stats.total_collections(),
        batches = outcome.stats.total_batches(),
        received = outcome.stats.total_received(),
        written = outcome.stats.total_written(),
        "dump finished"
    );

    if !outcome.errors.is_empty() {
        for e in &outcome.errors {
            error!(database_error = %e, "database dump reported an error");
        }
        return Err(DumpError::Semantic(outcome.errors.join("; ")).into());
    }

    Ok(())
}

/// Ctrl-C triggers the same "drain the queue, let in-flight calls finish"
/// path a worker error takes (spec.md §4.F, SPEC_FULL.md §6). A second
/// Ctrl-C kills the process immediately in case the drain is itself stuck.
fn install_ctrlc_handler(cancel: CancellationToken) {
    let already_requested = AtomicBool::new(false);
    let result = ctrlc::set_handler(move || {
        if already_requested.swap(true, Ordering::SeqCst) {
            eprintln!("docdump: second interrupt received, exiting immediately");
            std::process::exit(130);
        }
        eprintln!("docdump: interrupt received, draining in-flight work...");
        cancel.cancel();
    });
    if let Err(e) = result {
        debug!(error = %e, "could not install Ctrl-C handler");
    }
}

/// Polls `stats` on a background thread and renders an `indicatif` spinner
/// (SPEC_FULL.md §6 "--progress live reporting"). Returns the bar and a
/// stop flag; the caller flips the flag and finishes the bar once the dump
/// returns.
fn spawn_progress_reporter(stats: Arc<Stats>) -> (indicatif::ProgressBar, Arc<AtomicBool>) {
    let bar = indicatif::ProgressBar::new_spinner();
    bar.set_style(
        indicatif::ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
    );
    let done = Arc::new(AtomicBool::new(false));
    let done_for_thread = Arc::clone(&done);
    let bar_for_thread = bar.clone();
    std::thread::spawn(move || {
        while !done_for_thread.load(Ordering::Relaxed) {
            bar_for_thread.set_message(format!(
                "collections={} batches={} received={} written={}",
                stats.total_collections(),
                stats.total_batches(),
                stats.total_received(),
                stats.total_written(),
            ));
            bar_for_thread.tick();
            std::thread::sleep(Duration::from_millis(200));
        }
    });
    (bar, done)
}
