//! tiercache - Move media between array and cache tiers without interrupting playback.
//!
//! Usage:
//!   tiercache paths [PATH...]                      Translate media-server paths to real paths
//!   tiercache filter --to cache|array [PATH...]    Keep files that need to change tier
//!   tiercache analyze --op cache [PATH...]         Describe a batch without touching it
//!   tiercache space --dest DIR [PATH...]           Check the destination has room
//!   tiercache move --source DIR --dest DIR [PATH...]
//!   tiercache delete [PATH...]
//!
//! Paths are read from stdin, one per line, when none are given.

use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use tiercache_core::{OperationType, TierConfig, TransferOutcome, size_to_human};
use tiercache_ops::{MoveOptions, TransferEngine};

#[derive(Parser)]
#[command(
    name = "tiercache",
    version,
    about = "Move media between array and cache storage tiers",
    long_about = "tiercache copies media to its new tier and swaps the old path for a \
                  symlink in a single rename, so files that are being played keep \
                  playing.\n\n\
                  Commands compose through pipes: `tiercache paths | tiercache filter \
                  --to cache`."
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate media-server paths to real filesystem paths
    Paths {
        /// Paths as reported by the media server
        paths: Vec<String>,
    },

    /// Keep only files that need to move to the given tier
    Filter {
        /// Target tier
        #[arg(long)]
        to: Tier,

        /// Real paths
        paths: Vec<String>,
    },

    /// Describe what an operation would touch
    Analyze {
        /// Operation to describe (cache, array, delete)
        #[arg(long, default_value = "cache")]
        op: OperationType,

        /// Real paths
        paths: Vec<String>,
    },

    /// Check that the destination can hold the files
    Space {
        /// Destination directory
        #[arg(long)]
        dest: PathBuf,

        /// Real paths
        paths: Vec<String>,
    },

    /// Move files from one tier root to another
    Move {
        /// Root of the tier the files live on
        #[arg(long)]
        source: PathBuf,

        /// Root of the tier to move them to
        #[arg(long)]
        dest: PathBuf,

        /// Copy instead of move
        #[arg(long)]
        copy: bool,

        /// Report what would happen without touching anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Number of parallel transfers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Real paths under the source root
        paths: Vec<String>,
    },

    /// Delete files
    Delete {
        /// Number of parallel deletions
        #[arg(short, long)]
        workers: Option<usize>,

        /// Real paths
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Tier {
    Cache,
    Array,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = TierConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let engine = TransferEngine::new(config);
    for warning in engine.warnings() {
        warn!("{warning}");
    }

    let format = cli.format;
    match cli.command {
        Command::Paths { paths } => {
            let real = engine.process_file_paths(&read_paths(paths)?);
            print_paths(&real, format)?;
        }
        Command::Filter { to, paths } => {
            let files = to_paths(read_paths(paths)?);
            let eligible = match to {
                Tier::Cache => engine.filter_files_for_cache(&files),
                Tier::Array => engine.filter_files_for_array(&files),
            };
            print_paths(&eligible, format)?;
        }
        Command::Analyze { op, paths } => {
            let files = to_paths(read_paths(paths)?);
            let analysis = engine.analyze_files_for_test_mode(&files, op);
            match format {
                OutputFormat::Text => {
                    for file in &analysis.files {
                        println!("{:>10}  {}", file.size_human, file.path.display());
                    }
                    println!(
                        "{} {} files ({})",
                        analysis.operation, analysis.file_count, analysis.total_size_human
                    );
                    for warning in &analysis.warnings {
                        eprintln!("warning: {warning}");
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
            }
        }
        Command::Space { dest, paths } => {
            let files = to_paths(read_paths(paths)?);
            return run_space(&engine, &files, &dest, format);
        }
        Command::Move {
            source,
            dest,
            copy,
            dry_run,
            workers,
            paths,
        } => {
            let files = to_paths(read_paths(paths)?);
            let mut options = if copy {
                MoveOptions::copy()
            } else {
                MoveOptions::default()
            };
            options = options.with_dry_run(dry_run);
            if let Some(workers) = workers {
                options = options.with_concurrency(workers);
            }
            return run_move(&engine, &files, &source, &dest, options, format);
        }
        Command::Delete { workers, paths } => {
            let files = to_paths(read_paths(paths)?);
            let summary = engine
                .delete(&files, workers)
                .context("Deletion failed to start")?;
            match format {
                OutputFormat::Text => {
                    println!("{}", summary.summary());
                    for error in &summary.errors {
                        eprintln!("error: {error}");
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
            if !summary.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Install the global tracing subscriber on stderr.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

/// Use the given paths, or read them from stdin when there are none.
fn read_paths(args: Vec<String>) -> Result<Vec<String>> {
    if !args.is_empty() {
        return Ok(args);
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(eyre!("No paths given and stdin is a terminal"));
    }
    let mut paths = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read paths from stdin")?;
        let line = line.trim();
        if !line.is_empty() {
            paths.push(line.to_string());
        }
    }
    Ok(paths)
}

fn to_paths(paths: Vec<String>) -> Vec<PathBuf> {
    paths.into_iter().map(PathBuf::from).collect()
}

fn print_paths(paths: &[PathBuf], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for path in paths {
                println!("{}", path.display());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(paths)?),
    }
    Ok(())
}

fn run_space(
    engine: &TransferEngine,
    files: &[PathBuf],
    dest: &Path,
    format: OutputFormat,
) -> Result<ExitCode> {
    let fits = engine.check_available_space(files, dest);
    match format {
        OutputFormat::Text => {
            let verdict = if fits { "fits" } else { "does not fit" };
            println!("{} files {} on {}", files.len(), verdict, dest.display());
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "destination": dest, "files": files.len(), "has_space": fits })
        ),
    }
    Ok(if fits {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_move(
    engine: &TransferEngine,
    files: &[PathBuf],
    source: &Path,
    dest: &Path,
    options: MoveOptions,
    format: OutputFormat,
) -> Result<ExitCode> {
    let mut progress = engine.subscribe();
    std::thread::spawn(move || {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match progress.blocking_recv() {
                Ok(p) => debug!(
                    completed = p.completed,
                    total = p.total,
                    failed = p.failed,
                    bytes = %size_to_human(p.bytes),
                    file = %p.current.display(),
                    "progress"
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = engine
        .move_files(files, source, dest, options)
        .with_context(|| format!("Transfer to {} failed", dest.display()))?;
    print_outcome(&outcome, format)?;

    Ok(if outcome.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_outcome(outcome: &TransferOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", outcome.summary());
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
            for error in &outcome.errors {
                eprintln!("error: {error}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
    }
    Ok(())
}
