//! Command dispatch for the `arkive` binary: installs logging, turns parsed
//! arguments into option structs and prints a short summary per command.

use crate::backup::{archive_size, backup, BackupOptions};
use crate::cli::{self, Commands};
use crate::common::EntryKind;
use crate::extract::{list, restore, RestoreOptions};
use crate::hashcheck::hash_check;

use std::io::{self, Write};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maps `-v` occurrences to a default log level. Warnings are always shown.
fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Logs go to stderr so that `list` and `hashcheck` output stays pipeable.
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn init_tracing(verbosity: u8) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level_for(verbosity)).into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(env_filter);

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
}

pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run();
    init_tracing(args.verbose);

    match args.command {
        Commands::Backup { input, output, compression_level, follow_symlinks, passphrase, atomic } => {
            let mut options = BackupOptions::new(input, output)
                .compression_level(compression_level)
                .follow_symlinks(follow_symlinks)
                .atomic(atomic);
            options.passphrase = passphrase.resolve(true)?;

            let stats = backup(&options)?;
            let size = archive_size(&options.destination)?;
            println!("Backed up {stats} to {} ({size} bytes)", options.destination.display());
        }
        Commands::Restore { input, output, passphrase } => {
            let mut options = RestoreOptions::new(input, output);
            options.passphrase = passphrase.resolve(false)?;

            let stats = restore(&options)?;
            println!("Restored {stats} into {}", options.destination.display());
        }
        Commands::List { input, passphrase, json } => {
            let mut options = RestoreOptions::new(input, ".");
            options.passphrase = passphrase.resolve(false)?;

            let entries = list(&options)?;
            let mut out = io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &entries)?;
                writeln!(out)?;
            } else {
                for entry in &entries {
                    match entry.kind {
                        EntryKind::Symlink => writeln!(out, "{:<7} {:o} {} -> {}", entry.kind, entry.mode, entry.path, entry.link_target)?,
                        EntryKind::File => writeln!(out, "{:<7} {:o} {} ({} bytes)", entry.kind, entry.mode, entry.path, entry.size)?,
                        _ => writeln!(out, "{:<7} {:o} {}", entry.kind, entry.mode, entry.path)?,
                    }
                }
            }
        }
        Commands::Hashcheck { dir, algo, json } => {
            let report = hash_check(&dir, algo)?;
            let mut out = io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
            } else if !report.has_duplicates() {
                writeln!(out, "No duplicate files found among {} files.", report.files_scanned)?;
            } else {
                for group in &report.groups {
                    writeln!(out, "Identical {} digest {}:", report.algorithm, group.digest)?;
                    for path in &group.paths {
                        writeln!(out, " - {}", path.display())?;
                    }
                    writeln!(out)?;
                }
            }
        }
    }

    Ok(())
}
