//! rotenv CLI entry point.
//!
//! `rotenv [OPTIONS] <LOGICAL_NAME> <COMMAND>...` runs `COMMAND` with the
//! credential bound to `LOGICAL_NAME` and restarts it whenever that
//! credential rotates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};

use rotenv::config::{load_settings, Settings, SupervisorConfig, VariantChangePolicy};
use rotenv::credential::CredentialRegistry;
use rotenv::process::{CommandSpec, ProcessLauncher};
use rotenv::supervisor::Supervisor;

/// Run a command and restart it whenever its rotating credential changes.
#[derive(Parser)]
#[command(name = "rotenv", version, about)]
struct Cli {
    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Credential type to export.
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    variant: Option<String>,

    /// Credential document (JSON).
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    document: Option<PathBuf>,

    /// Credential document refresh interval in seconds.
    #[arg(short, long, value_name = "SECS")]
    interval: Option<u64>,

    /// Optional TOML settings file.
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Also write JSON logs to this directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// What to do when the credential type changes between polls.
    #[arg(long, value_enum, value_name = "POLICY")]
    on_variant_change: Option<VariantChangePolicy>,

    /// Name of the credential entry to monitor.
    logical_name: String,

    /// Command to execute, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    apply_overrides(&mut settings, &cli);
    settings.validate()?;

    let verbose = settings.logging.verbose;
    let logging_guard = match &settings.logging.dir {
        Some(dir) => Some(rotenv::logging::init_production(dir, verbose)?),
        None => {
            rotenv::logging::init_cli(verbose);
            None
        }
    };

    // The signal task owns the guard; it is flushed on signal exit and when
    // the runtime shuts down after a fatal error.
    let _signal_task = rotenv::signals::spawn_exit_on_signal(logging_guard)
        .context("failed to install signal handlers")?;

    let command = CommandSpec::from_argv(cli.command.clone())
        .ok_or_else(|| anyhow::anyhow!("missing command to execute"))?;
    let config =
        SupervisorConfig::from_settings(cli.logical_name.clone(), command, &settings.supervisor);
    config.validate()?;

    let registry = CredentialRegistry::builtin();
    if registry.get(&config.variant).is_none() {
        warn!(
            variant = %config.variant,
            known = ?registry.variants(),
            "unsupported credential type, every reference will be skipped"
        );
    }

    let mut supervisor = Supervisor::new(config, registry, ProcessLauncher);
    let err = supervisor.run().await;
    error!(error = %err, "supervision aborted");
    Err(err.into())
}

/// Layer command-line flags over file settings.
fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if cli.verbose {
        settings.logging.verbose = true;
    }
    if let Some(dir) = &cli.log_dir {
        settings.logging.dir = Some(dir.clone());
    }
    if let Some(variant) = &cli.variant {
        settings.supervisor.variant = variant.clone();
    }
    if let Some(document) = &cli.document {
        settings.supervisor.document = document.clone();
    }
    if let Some(interval) = cli.interval {
        settings.supervisor.interval_secs = interval;
    }
    if let Some(policy) = cli.on_variant_change {
        settings.supervisor.on_variant_change = policy;
    }
}
