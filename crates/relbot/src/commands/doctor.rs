//! Doctor command: diagnose configuration and environment.

use camino::Utf8Path;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use relbot_core::bump::DEFAULT_VERSION_COMMAND;
use relbot_core::changeset::DEFAULT_CHANGESET_DIR;
use relbot_core::config::{self, Config, GitConfig, PrepareConfig, ReleaseConfig};
use relbot_core::git::{DEFAULT_REMOTE, Identity};
use relbot_core::preflight::{self, PreflightReport};
use relbot_core::prepare::{
    DEFAULT_BASE_BRANCH, DEFAULT_PACKAGE_DIR, DEFAULT_RELEASE_BRANCH, PrepareSettings,
};
use relbot_core::reconcile::DuplicatePolicy;
use relbot_core::release_pr::{DEFAULT_COMMIT_TEMPLATE, DEFAULT_TITLE_TEMPLATE};

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct DoctorReport {
    directories: DirectoryPaths,
    config: ConfigStatus,
    environment: EnvironmentInfo,
    preflight: PreflightReport,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    data: Option<String>,
}

#[derive(Serialize)]
struct ConfigStatus {
    /// Project config file, if one was discovered
    file: Option<String>,
    found: bool,
}

#[derive(Serialize)]
struct EnvironmentInfo {
    cwd: String,
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    /// `None` when unset; secrets only report `"(set)"`.
    value: Option<String>,
    description: &'static str,
}

impl EnvVar {
    fn read(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            value: std::env::var(name).ok(),
            description,
        }
    }

    fn presence(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            value: std::env::var_os(name).map(|_| "(set)".to_string()),
            description,
        }
    }
}

impl DoctorReport {
    fn gather(config: &Config, cwd: &Utf8Path) -> Self {
        let config_file = config::find_project_config(cwd);
        let settings = PrepareSettings::from_config(config);

        Self {
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                data: config::user_data_dir().map(|p| p.to_string()),
            },
            config: ConfigStatus {
                found: config_file.is_some(),
                file: config_file.map(|p| p.to_string()),
            },
            environment: EnvironmentInfo {
                cwd: cwd.to_string(),
                env_vars: vec![
                    EnvVar::read("RUST_LOG", "Log filter directive"),
                    EnvVar::read("RELBOT_LOG_PATH", "JSONL log file"),
                    EnvVar::read("RELBOT_LOG_DIR", "JSONL log directory"),
                    EnvVar::read("GITHUB_REPOSITORY", "Repository fallback"),
                    EnvVar::presence("GH_TOKEN", "Token for the gh CLI"),
                    EnvVar::presence("GITHUB_TOKEN", "Token for the gh CLI"),
                ],
            },
            preflight: preflight::run_preflight(cwd, &settings),
        }
    }
}

/// Run diagnostics and report configuration status.
#[instrument(name = "cmd_doctor", skip_all, fields(json_output))]
pub fn cmd_doctor(
    _args: DoctorArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing doctor command");

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Gathering diagnostics...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let report = DoctorReport::gather(config, cwd);
    spinner.finish_and_clear();

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Configuration".bold().underline());
    match report.config.file {
        Some(ref file) => println!("  {} Config file: {}", "✓".green(), file.cyan()),
        None => {
            println!("  {} No project config file found", "○".yellow());
            offer_config_creation()?;
        }
    }
    println!();

    println!("{}", "Directories".bold().underline());
    print_dir("  Config", report.directories.config.as_deref());
    print_dir("  Data", report.directories.data.as_deref());
    println!();

    println!("{}", "Environment".bold().underline());
    println!(
        "  {}: {}",
        "Working directory".dimmed(),
        report.environment.cwd.cyan()
    );
    let set_vars: Vec<_> = report
        .environment
        .env_vars
        .iter()
        .filter(|v| v.value.is_some())
        .collect();
    if set_vars.is_empty() {
        println!("  {} No relevant variables set", "○".dimmed());
    }
    for var in set_vars {
        println!(
            "  {}: {}",
            var.name.dimmed(),
            var.value.as_deref().unwrap_or_default().cyan()
        );
    }
    println!();

    println!("{}", "Preflight".bold().underline());
    for check in &report.preflight.checks {
        let mark = if check.passed {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        println!("  {mark} {}: {}", check.name, check.message.dimmed());
    }
    if !report.preflight.all_passed {
        println!();
        println!("{}", "Some checks failed; prepare is likely to fail.".yellow());
    }

    Ok(())
}

fn print_dir(label: &str, path: Option<&str>) {
    print!("{}: ", label.dimmed());
    match path {
        Some(p) => println!("{}", p.cyan()),
        None => println!("{}", "(unavailable)".yellow()),
    }
}

/// A config with every setting spelled out at its default.
fn starter_config() -> Config {
    let identity = Identity::default();
    Config {
        release: Some(ReleaseConfig {
            release_branch: Some(DEFAULT_RELEASE_BRANCH.into()),
            base_branch: Some(DEFAULT_BASE_BRANCH.into()),
            package_dir: Some(DEFAULT_PACKAGE_DIR.into()),
            version_command: Some(DEFAULT_VERSION_COMMAND.into()),
            changeset_dir: Some(DEFAULT_CHANGESET_DIR.into()),
            title: Some(DEFAULT_TITLE_TEMPLATE.into()),
            commit_message: Some(DEFAULT_COMMIT_TEMPLATE.into()),
            on_multiple: Some(DuplicatePolicy::default()),
        }),
        git: Some(GitConfig {
            remote: Some(DEFAULT_REMOTE.into()),
            user_name: Some(identity.name),
            user_email: Some(identity.email),
        }),
        prepare: Some(PrepareConfig {
            confirm: Some(true),
        }),
        ..Config::default()
    }
}

/// Offer to create a user config file when none exists.
fn offer_config_creation() -> anyhow::Result<()> {
    let Some(config_dir) = config::user_config_dir() else {
        return Ok(());
    };
    let config_path = config_dir.join("config.yaml");
    if config_path.exists() || !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Ok(());
    }

    let create = Confirm::new("Create a user config file with the defaults?")
        .with_default(false)
        .with_help_message(&format!("Will create {config_path}"))
        .prompt();

    // Declined or interrupted: nothing to do.
    if let Ok(true) = create {
        std::fs::create_dir_all(&config_dir)?;
        let yaml = serde_saphyr::to_string(&starter_config())?;
        std::fs::write(&config_path, yaml)?;
        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }

    Ok(())
}
