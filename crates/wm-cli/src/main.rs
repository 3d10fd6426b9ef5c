//! CLI entry point for the watchman subscription client.
//!
//! Subscribes to a directory and prints one line per change event until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! wm-subscribe [OPTIONS]
//!
//! # Watch the current directory
//! wm-subscribe
//!
//! # Only JavaScript sources, pausing logs during hg updates
//! wm-subscribe --path ./web --glob '**/*.js' --defer hg.update
//!
//! # Machine-readable output
//! wm-subscribe --json --ignore 'node_modules/**'
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wm_core::{ChangeKind, Config, FileStat, WatcherOptions};
use wm_watcher::{EventKind, FileFilter, GlobFilter, WatchError, WatcherEvent, WatchmanWatcher};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Streams file changes reported by the watchman daemon.
///
/// Reconnects automatically when the daemon restarts.
#[derive(Parser)]
#[command(name = "wm-subscribe", version, about, long_about = None)]
struct Cli {
    /// Directory to watch.
    #[arg(short, long, env = "WM_SUBSCRIBE_PATH", default_value = ".")]
    path: Utf8PathBuf,

    /// Inclusion glob, relative to the watched directory. Repeatable.
    #[arg(short, long = "glob", value_name = "GLOB")]
    globs: Vec<String>,

    /// Report dotfiles too.
    #[arg(long)]
    dot: bool,

    /// Daemon state to log entry into and exit from (e.g. `hg.update`). Repeatable.
    #[arg(long = "defer", value_name = "STATE")]
    defer_states: Vec<String>,

    /// Glob of paths to ignore, relative to the watched directory. Repeatable.
    #[arg(long = "ignore", value_name = "GLOB")]
    ignores: Vec<String>,

    /// Daemon socket (skips discovery).
    #[arg(long, env = "WATCHMAN_SOCK")]
    sockname: Option<Utf8PathBuf>,

    /// JSON configuration file; flags are applied on top of it.
    #[arg(short, long, env = "WM_SUBSCRIBE_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds [`WatcherOptions`] from the config file (if any) and the flags.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded or the merged
/// options are invalid.
fn build_options(cli: &Cli) -> color_eyre::Result<WatcherOptions> {
    let mut options = match &cli.config {
        Some(path) => Config::from_file(path)?.watch,
        None => WatcherOptions::default(),
    };

    options.globs.extend(cli.globs.iter().cloned());
    options.defer_states.extend(cli.defer_states.iter().cloned());
    options.dot |= cli.dot;
    if let Some(sockname) = &cli.sockname {
        options.socket_path = Some(sockname.clone());
    }

    options.validate()?;
    Ok(options)
}

/// Compiles the `--ignore` globs into a predicate, or `None` if there are none.
fn build_ignore(patterns: &[String]) -> color_eyre::Result<Option<GlobFilter>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    // Dotfiles are matched like any other path here.
    Ok(Some(GlobFilter::new(patterns, true)?))
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// One printed event.
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    event: &'static str,
    path: &'a Utf8Path,
    root: &'a Utf8Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    stat: Option<&'a FileStat>,
}

/// Renders a catch-all event as a single output line.
fn render(kind: ChangeKind, change: &wm_core::FileChange, json: bool) -> color_eyre::Result<String> {
    if json {
        let line = EventLine {
            event: kind.label(),
            path: &change.path,
            root: &change.root,
            stat: change.stat.as_ref(),
        };
        return Ok(serde_json::to_string(&line)?);
    }

    Ok(format!("{:<6} {}", kind.label(), change.path))
}

// =============================================================================
// COMMAND IMPLEMENTATION
// =============================================================================

/// Runs the watcher until Ctrl-C or a fatal reconnect failure.
///
/// # Errors
///
/// Returns an error if the watcher cannot start or gives up reconnecting.
async fn run(cli: &Cli, options: WatcherOptions) -> color_eyre::Result<()> {
    let mut watcher = WatchmanWatcher::new(&cli.path, options)?;
    if let Some(ignore) = build_ignore(&cli.ignores)? {
        watcher = watcher.with_ignore(move |path: &Utf8Path| ignore.should_process(path));
    }

    let mut events = watcher.subscribe(&[
        EventKind::Ready,
        EventKind::Error,
        EventKind::FreshInstance,
        EventKind::All,
    ]);
    watcher.start()?;
    info!(root = %watcher.root(), "Connecting to watchman");

    let stdout = std::io::stdout();
    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(());
                };
                match event {
                    WatcherEvent::Ready => info!(root = %watcher.root(), "Watching"),
                    WatcherEvent::FreshInstance => info!("watchman rescanned; treat all files as changed"),
                    WatcherEvent::All(kind, change) => {
                        let line = render(kind, &change, cli.json)?;
                        writeln!(stdout.lock(), "{line}")?;
                    }
                    WatcherEvent::Error(error) => {
                        if matches!(error.as_ref(), WatchError::ReconnectExhausted { .. }) {
                            break Err(color_eyre::eyre::eyre!("{error}"));
                        }
                        tracing::warn!(%error, "Watcher error");
                    }
                    WatcherEvent::Add(_) | WatcherEvent::Change(_) | WatcherEvent::Delete(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break Ok(());
            }
        }
    };

    let stats = watcher.stats();
    watcher.shutdown().await?;
    info!(
        sessions = stats.sessions,
        events = stats.events,
        filtered = stats.filtered,
        "Watcher stopped"
    );

    outcome
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Merge config file and flags, then watch
    let options = build_options(&cli)?;
    run(&cli, options).await
}
