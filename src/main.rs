// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use dlsync::client::HttpDownloadService;
use dlsync::config::{self, Config, BASE_URL_ENV};
use dlsync::display::{format_speed, progress_text, record_line, stats_line, status_colored};
use dlsync::download::{
    CommandOutcome, Download, DownloadCommand, DownloadId, DownloadManager, DownloadStats, NewDownload, ThreadCount,
};
use dlsync::error::{describe, DownloadError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often `watch` re-lists the service to pick up downloads started elsewhere.
const WATCH_REFRESH: Duration = Duration::from_secs(5);

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Usage error - rejected input or invalid command for the current status
    pub const USAGE: i32 = 64;
    /// Data error - the service answered with something we could not read
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - download service not running or not reachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Temporary failure - try again later
    pub const TEMP_FAIL: i32 = 75;
}

use exit_codes::*;

#[derive(Parser)]
#[command(name = "dlsync")]
#[command(version = VERSION)]
#[command(about = "Track and control downloads running on a remote download service.")]
#[command(long_about = "dlsync - client for a remote download service\n\n\
    Start a download:    dlsync add https://example.com/file.iso\n\
    List downloads:      dlsync list\n\
    Follow progress:     dlsync watch\n\
    Control one:         dlsync pause 3 / resume 3 / cancel 3 / delete 3\n\
    Configure:           dlsync config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Download service API root (overrides config and DLSYNC_BASE_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new download
    ///
    /// Examples:
    ///   dlsync add https://example.com/file.iso
    ///   dlsync add https://example.com/file.iso --name debian.iso --threads 8 --wait
    Add {
        /// URL to download
        url: String,
        /// File name to save as (service picks one if omitted)
        #[arg(short, long)]
        name: Option<String>,
        /// Parallel connections: 1, 2, 4, 8 or 16
        #[arg(short, long, default_value_t = 4)]
        threads: u32,
        /// Follow the download until it finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// List every download the service knows about
    #[command(alias = "ls")]
    List,

    /// Pause a running download
    Pause { id: String },

    /// Resume a paused download
    Resume { id: String },

    /// Cancel a download that has not finished
    Cancel { id: String },

    /// Delete a download, whatever its status
    #[command(alias = "rm")]
    Delete { id: String },

    /// Show aggregate counts and total speed
    Stats,

    /// Follow all downloads live (Ctrl+C to stop)
    Watch {
        /// Exit once nothing is queued or downloading
        #[arg(long)]
        until_idle: bool,
    },

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    ///
    /// Example:
    ///   dlsync config show
    Show,

    /// Set the download service URL
    ///
    /// Example:
    ///   dlsync config set-url http://localhost:8086/api
    SetUrl {
        /// API root of the download service
        url: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dlsync::logging::init_logging(cli.verbose, cli.quiet) {
        eprintln!("{} {}", "[!]".yellow(), e);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to start async runtime: {}", "[✗]".red(), e);
            std::process::exit(ERROR);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        std::process::exit(report(&e));
    }
}

/// Print an error and pick the exit code for it.
fn report(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DownloadError>() {
        Some(download_err) => {
            eprint!("{}", describe(download_err).as_str().red());
            match download_err {
                DownloadError::Validation(_) | DownloadError::InvalidTransition { .. } => USAGE,
                DownloadError::Unreachable(_) => SERVICE_UNAVAILABLE,
                DownloadError::Timeout(_) => TEMP_FAIL,
                DownloadError::Decode(_) => DATA_ERR,
                _ if download_err.is_transient() => TEMP_FAIL,
                _ => ERROR,
            }
        }
        None => {
            eprintln!("{} {:#}", "[✗]".red(), err);
            ERROR
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config()?.with_overrides(None, cli.url.clone());

    match cli.command {
        Commands::Config { command } => config_command(command, config).await,
        Commands::Add { url, name, threads, wait } => {
            let threads = ThreadCount::try_from(threads)?;
            let mut request = NewDownload::new(url).with_threads(threads);
            if let Some(name) = name {
                request = request.with_file_name(name);
            }

            let manager = connect(&config)?;
            if wait {
                manager.start();
            }
            let created = manager.create(request).await?;
            println!("{} Started download {}", "[OK]".green(), created.id.as_str().bold());
            println!("{}", record_line(&created));

            if wait {
                watch(&manager, Some(created.id), false).await?;
            }
            Ok(())
        }
        Commands::List => {
            let manager = connect(&config)?;
            manager.refresh().await?;
            let records = manager.snapshot();
            if records.is_empty() {
                println!("No downloads.");
            }
            for record in &records {
                println!("{}", record_line(record));
            }
            Ok(())
        }
        Commands::Stats => {
            let manager = connect(&config)?;
            manager.refresh().await?;
            println!("{}", stats_line(&manager.recompute_stats()));
            Ok(())
        }
        Commands::Pause { id } => lifecycle(&config, DownloadCommand::Pause(id.into())).await,
        Commands::Resume { id } => lifecycle(&config, DownloadCommand::Resume(id.into())).await,
        Commands::Cancel { id } => lifecycle(&config, DownloadCommand::Cancel(id.into())).await,
        Commands::Delete { id } => lifecycle(&config, DownloadCommand::Delete(id.into())).await,
        Commands::Watch { until_idle } => {
            let manager = connect(&config)?;
            manager.refresh().await?;
            manager.start();
            watch(&manager, None, until_idle).await
        }
    }
}

fn connect(config: &Config) -> Result<DownloadManager> {
    let service = HttpDownloadService::with_timeout(&config.base_url, config.request_timeout())?;
    tracing::debug!(base_url = service.base_url(), "using download service");
    Ok(DownloadManager::new(Arc::new(service), config.manager_config()))
}

/// Run one lifecycle command against an up-to-date registry, so the local
/// status check sees what the service currently reports.
async fn lifecycle(config: &Config, command: DownloadCommand) -> Result<()> {
    let manager = connect(config)?;
    manager.refresh().await?;

    let verb = command.name();
    match manager.dispatch(command).await? {
        CommandOutcome::Transitioned { id, status, .. } => {
            println!(
                "{} {} {} -> {}",
                "[OK]".green(),
                verb,
                id.as_str().bold(),
                status_colored(status)
            );
        }
        CommandOutcome::Deleted(id) => {
            println!("{} Deleted download {}", "[OK]".green(), id.as_str().bold());
        }
        CommandOutcome::Created(record) => {
            println!("{}", record_line(&record));
        }
    }
    Ok(())
}

async fn config_command(command: ConfigCommands, config: Config) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let path = config::config_path()?;
            println!("{}", "Configuration".bright_cyan().bold());
            println!("  File:            {}", path.display());
            println!("  Service URL:     {}", config.base_url.bright_white());
            if std::env::var(BASE_URL_ENV).is_ok() {
                println!("                   (from {})", BASE_URL_ENV);
            }
            println!("  Poll interval:   {} ms", config.poll_interval_ms);
            println!("  Stats interval:  {} ms", config.stats_interval_ms);
            println!("  Request timeout: {} s", config.request_timeout_secs);
            println!("  On poll failure: {:?}", config.poll_failure_policy);

            let service = HttpDownloadService::with_timeout(&config.base_url, config.request_timeout())?;
            if service.ping().await {
                println!("  Service:         {}", "reachable".green());
            } else {
                println!("  Service:         {}", "unreachable".red());
            }
            Ok(())
        }
        ConfigCommands::SetUrl { url } => {
            // Reject garbage before it lands in the file.
            HttpDownloadService::new(&url)?;

            let path = config::config_path()?;
            let mut stored = Config::load_from(&path)?;
            stored.base_url = url;
            config::save_config(&stored).context("Failed to save configuration")?;
            println!("{} Service URL set to {}", "[OK]".green(), stored.base_url.bold());
            Ok(())
        }
    }
}

/// Live view: one bar per download plus a stats header.
struct WatchView {
    multi: MultiProgress,
    header: ProgressBar,
    style: ProgressStyle,
    bars: HashMap<DownloadId, ProgressBar>,
}

impl WatchView {
    fn new() -> Result<Self> {
        let multi = MultiProgress::new();
        let header = multi.add(ProgressBar::new_spinner());
        header.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
        header.enable_steady_tick(Duration::from_millis(120));

        let style = ProgressStyle::with_template("{prefix:>4} [{bar:30.green/white}] {percent:>3}% {msg}")?
            .progress_chars("=> ");

        Ok(Self {
            multi,
            header,
            style,
            bars: HashMap::new(),
        })
    }

    fn render(&mut self, records: &[Download], header: String) {
        self.header.set_message(header);

        self.bars.retain(|id, bar| {
            let keep = records.iter().any(|r| &r.id == id);
            if !keep {
                bar.finish_and_clear();
                self.multi.remove(bar);
            }
            keep
        });

        for record in records {
            let bar = self.bars.entry(record.id.clone()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(self.style.clone());
                bar.set_prefix(record.id.to_string());
                bar
            });

            match record.file_size {
                Some(size) => {
                    bar.set_length(size);
                    bar.set_position(record.downloaded_bytes);
                }
                None => {
                    bar.set_length(100);
                    bar.set_position(record.progress.round() as u64);
                }
            }

            let name = if record.file_name.is_empty() { &record.url } else { &record.file_name };
            let mut message = format!("{} {} {}", status_colored(record.status), name, progress_text(record));
            if record.effective_speed() > 0.0 {
                message.push_str(&format!(" {}", format_speed(record.effective_speed()).cyan()));
            }
            bar.set_message(message);
        }
    }

    fn finish(self) {
        for bar in self.bars.values() {
            bar.abandon();
        }
        self.header.finish_and_clear();
    }
}

/// Whether the watch loop has nothing left to wait for.
fn settled(manager: &DownloadManager, only: Option<&DownloadId>, until_idle: bool) -> bool {
    let stalled = manager.stalled();

    match only {
        Some(id) => manager
            .registry()
            .get(id)
            .map_or(true, |record| !record.status.is_active() || stalled.contains(id)),
        None => {
            // Stalled records will not move again; leave them out.
            let tracked: Vec<Download> = manager
                .snapshot()
                .into_iter()
                .filter(|record| !stalled.contains(&record.id))
                .collect();
            until_idle && DownloadStats::from_records(&tracked).is_idle()
        }
    }
}

async fn watch(manager: &DownloadManager, only: Option<DownloadId>, until_idle: bool) -> Result<()> {
    let mut view = WatchView::new()?;
    let mut changes = manager.registry().subscribe();
    let mut stats = manager.subscribe_stats();
    let mut refresh = tokio::time::interval(WATCH_REFRESH);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let records: Vec<Download> = match &only {
            Some(id) => manager.registry().get(id).into_iter().collect(),
            None => manager.snapshot(),
        };
        view.render(&records, stats_line(&manager.stats()));

        if settled(manager, only.as_ref(), until_idle) {
            break;
        }

        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = stats.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = refresh.tick(), if only.is_none() => {
                if let Err(e) = manager.refresh().await {
                    tracing::warn!("refresh failed: {}", e);
                }
            }
        }
    }

    view.finish();
    manager.shutdown();

    println!("{}", stats_line(&manager.recompute_stats()));
    let stalled = manager.stalled();
    if !stalled.is_empty() {
        let ids: Vec<&str> = stalled.iter().map(|id| id.as_str()).collect();
        eprintln!(
            "{} Lost track of {} after a failed poll; run `dlsync watch` again to resume tracking",
            "[!]".yellow(),
            ids.join(", ")
        );
    }
    Ok(())
}
