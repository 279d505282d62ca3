/*!
 * Umbra - Incremental Backup Utility
 *
 * A checksum-verified directory mirroring tool:
 * - Parallel tree walking, digesting, deletion and copying
 * - MD5 / SHA-256 / SHA-512 digest manifests for bit-rot validation
 * - Incremental copies that skip unchanged files
 * - Stray-entry deletion with a skip-aware policy
 */

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

use umbra::cli_progress::CliProgressRenderer;
use umbra::config::BackupConfig;
use umbra::core::{Backupper, EventPublisher};
use umbra::logging::init_logging;

fn main() -> Result<()> {
    let matches = Command::new("Umbra")
        .version(umbra::VERSION)
        .about("Incremental checksum-verified directory backup with manifest validation")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the configuration file (default: ./umbra.toml, ~/.umbra/umbra.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress the interactive status line and final report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Write JSON logs to this file instead of stdout"),
        )
        .subcommand(Command::new("backup").about("Back up the configured inputs to the destination"))
        .subcommand(Command::new("validate").about("Validate the mirror against its digest manifest"))
        .subcommand_required(true)
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = BackupConfig::load_with_fallback(config_path.as_deref())
        .context("Failed to load configuration")?;

    if matches.get_flag("verbose") {
        config.verbose = true;
    }
    if let Some(log_file) = matches.get_one::<String>("log-file") {
        config.log_file = Some(PathBuf::from(log_file));
    }

    init_logging(&config).context("Failed to initialize logging")?;

    let quiet = matches.get_flag("quiet");
    let (publisher, subscriber) = EventPublisher::channel();
    let renderer = CliProgressRenderer::new(subscriber, quiet).spawn();

    let mut backupper = Backupper::new(config);
    backupper.set_event_publisher(publisher);
    let stats = backupper.stats();

    let (code, report) = match matches.subcommand() {
        Some(("validate", _)) => {
            let code = backupper.run_validation();
            (code, stats.to_validation_report())
        }
        _ => {
            let code = backupper.run_backup();
            (code, stats.to_report())
        }
    };

    // Dropping the engine closes the event channel and stops the renderer
    drop(backupper);
    let _ = renderer.join();

    if !quiet {
        println!("{}", report);
    }

    std::process::exit(code.code());
}
