//! Library interface for the `relbot` CLI.
//!
//! Exposes the argument parser and command implementations so they can be
//! tested without spawning the binary. The entry point is in `main.rs`.
//!
//! - [`Cli`] - The root argument parser (clap derive)
//! - [`Commands`] - Available subcommands
//! - [`commands`] - Command implementations

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Color output preference.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal capabilities automatically.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

impl ColorChoice {
    /// Configure global color output. Call once at startup.
    pub fn apply(self) {
        match self {
            Self::Auto => {} // owo-colors auto-detects by default
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

const ENV_HELP: &str = "\
ENVIRONMENT VARIABLES:
    RUST_LOG             Log filter for the JSONL log file (e.g., debug, relbot_core=trace)
    RELBOT_LOG_PATH      Write JSONL logs to this file
    RELBOT_LOG_DIR       Write JSONL logs to relbot.jsonl in this directory
    GITHUB_REPOSITORY    OWNER/REPO when not configured
    GH_TOKEN             Token used by the gh CLI
";

/// Command-line interface definition for relbot.
#[derive(Parser)]
#[command(name = "relbot")]
#[command(
    about = "Keep a single release pull request in sync with pending changesets",
    long_about = None
)]
#[command(version)]
#[command(after_long_help = ENV_HELP)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (merged over discovered config)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as if started in DIR
    #[arg(short = 'C', long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Only print errors (suppresses warnings/info)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More detail (repeatable; e.g. -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Colorize output
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorChoice,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands for the CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Rebuild the release branch and create or update the release PR
    Prepare(commands::prepare::PrepareArgs),

    /// Show pending changesets and resolved settings
    Status(commands::status::StatusArgs),

    /// Print one version's changelog section
    Changelog(commands::changelog::ChangelogArgs),

    /// Diagnose configuration and environment
    Doctor(commands::doctor::DoctorArgs),
}
