mod config;
mod discover;
mod fsdetect;
mod metadata;
mod rename;
mod sanitize;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use config::{FsPolicy, RunConfig, Verbosity};
use fsdetect::SystemMountTable;
use metadata::{ExifTool, DEFAULT_EXIFTOOL};
use rename::{OsFileOps, RenameOutcome, Renamer, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const EXIT_LOGGING: u8 = 1;

#[derive(Parser)]
#[command(
    name = "video-renamer",
    version,
    about = "Rename many video files using their metadata with ease",
    after_help = "In order to match recursive files correctly, please put your wildcard containing paths into single quotes."
)]
struct Cli {
    /// File(s) to be renamed. Wildcards, ~ and $VARS are expanded.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,

    /// Use an alternative exiftool binary, instead of the installed one.
    #[arg(long, value_name = "EXIFTOOL_PATH")]
    alternative_exiftool: Option<PathBuf>,

    /// Do not detect filesystem type automatically.
    #[arg(short = 'n', long, default_value_t = false)]
    no_fs_detect: bool,

    /// Rename files only with FAT32 safe characters (disables detection).
    #[arg(long, default_value_t = false)]
    fat32_safe: bool,

    /// Do not use characters which need escaping in shells.
    #[arg(long, default_value_t = false)]
    console_friendly: bool,

    /// Let ** in FILE patterns match files in subdirectories.
    #[arg(short, long, default_value_t = false)]
    recursive: bool,

    /// Do not actually rename files, print actions to be taken (implies -v).
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Print more detail about the process. Repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Do not print anything to console (overrides verbose).
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            console_friendly: self.console_friendly,
            fs_policy: FsPolicy::from_flags(self.fat32_safe, self.no_fs_detect),
            recursive: self.recursive,
            dry_run: self.dry_run,
            verbosity: Verbosity::from_flags(self.verbose, self.quiet, self.dry_run),
            exiftool: self
                .alternative_exiftool
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXIFTOOL)),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.run_config();

    if let Err(err) = init_logging(config.verbosity) {
        eprintln!("Cannot initialize logging: {err:#}");
        return ExitCode::from(EXIT_LOGGING);
    }

    debug!(
        recursive = config.recursive,
        fs_policy = ?config.fs_policy,
        console_friendly = config.console_friendly,
        dry_run = config.dry_run,
        "starting"
    );
    debug!(patterns = ?cli.files, "files to be processed");

    let groups = discover::collect_groups(&cli.files, &config, &SystemMountTable);

    let exiftool = ExifTool::new(&config.exiftool);
    debug!(exiftool = %exiftool.program().display(), "using metadata tool");
    let renamer = Renamer::new(&config, exiftool, OsFileOps);

    match renamer.run(&groups) {
        Ok(summary) => {
            if !config.verbosity.is_quiet() {
                print_rename_summary(&summary, config.dry_run);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}, aborting");
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(verbosity: Verbosity) -> Result<()> {
    let filter = EnvFilter::try_new(verbosity.level_filter().to_string())
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("failed to install log subscriber")
}

fn print_rename_summary(summary: &RunSummary, dry_run: bool) {
    println!(
        "Rename summary: files={} renamed={} simulated={} skipped={} failed={} dry_run={}",
        summary.outcomes.len(),
        summary.renamed(),
        summary.simulated(),
        summary.skipped(),
        summary.failed(),
        dry_run,
    );
    for outcome in &summary.outcomes {
        match outcome {
            RenameOutcome::Renamed { from, to, dry_run } => {
                let verb = if *dry_run { "would rename" } else { "renamed" };
                println!("  {}: {} -> {}", verb, from.display(), to.display());
            }
            RenameOutcome::Skipped { path, reason } => {
                println!("  skipped: {} ({})", path.display(), reason);
            }
            RenameOutcome::Failed { path, reason } => {
                println!("  failed: {} ({})", path.display(), reason);
            }
        }
    }
}
