//! Supervisor configuration.
//!
//! Settings come from three layers: built-in defaults, an optional TOML
//! settings file, and command-line flags (highest precedence). Every section
//! of the file uses `#[serde(default)]`, so a minimal or empty file is valid.
//! The merged result is frozen into a [`SupervisorConfig`] once at startup and
//! passed explicitly to the supervision loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::process::CommandSpec;

/// What the supervisor does when the credential variant changes between polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VariantChangePolicy {
    /// Treat the change as an integrity fault and stop supervising.
    #[default]
    Abort,
    /// Treat the change as an ordinary rotation and restart the child.
    Restart,
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Polling and credential selection.
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Polling and credential selection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSettings {
    /// Credential variant to construct (e.g. "symmetric").
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Path to the JSON credential document.
    #[serde(default = "default_document")]
    pub document: PathBuf,

    /// Seconds between polls of the credential document.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Reaction to a credential variant change.
    #[serde(default)]
    pub on_variant_change: VariantChangePolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            document: default_document(),
            interval_secs: default_interval_secs(),
            on_variant_change: VariantChangePolicy::default(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Emit debug-level logs.
    #[serde(default)]
    pub verbose: bool,

    /// Directory for JSON log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Settings {
    /// Validate that settings are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.supervisor.interval_secs >= 1,
            "supervisor.interval_secs must be >= 1"
        );
        anyhow::ensure!(
            !self.supervisor.variant.trim().is_empty(),
            "supervisor.variant must not be empty"
        );
        Ok(())
    }
}

/// Load settings from a TOML file.
///
/// Values are not validated here: command-line flags are layered on top
/// first, then the merged result goes through [`Settings::validate`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse settings at {}", path.display()))
}

/// Immutable configuration of one supervision run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Logical credential name to watch.
    pub logical_name: String,
    /// Command to supervise.
    pub command: CommandSpec,
    /// Credential variant to construct.
    pub variant: String,
    /// Path to the JSON credential document.
    pub document_path: PathBuf,
    /// Time between polls; also the minimum remaining credential lifetime.
    pub poll_interval: Duration,
    /// Reaction to a credential variant change.
    pub on_variant_change: VariantChangePolicy,
}

impl SupervisorConfig {
    /// Freeze settings into the configuration for `logical_name` and `command`.
    pub fn from_settings(
        logical_name: impl Into<String>,
        command: CommandSpec,
        settings: &SupervisorSettings,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            command,
            variant: settings.variant.clone(),
            document_path: settings.document.clone(),
            poll_interval: Duration::from_secs(settings.interval_secs),
            on_variant_change: settings.on_variant_change,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.logical_name.is_empty(),
            "logical credential name must not be empty"
        );
        anyhow::ensure!(
            !self.command.program.is_empty(),
            "command must not be empty"
        );
        anyhow::ensure!(
            self.poll_interval >= Duration::from_secs(1),
            "poll interval must be at least one second"
        );
        Ok(())
    }
}

// Default value functions for serde.

fn default_variant() -> String {
    crate::credential::symmetric::VARIANT.to_owned()
}

fn default_document() -> PathBuf {
    PathBuf::from("sec-config.json")
}

fn default_interval_secs() -> u64 {
    15
}
