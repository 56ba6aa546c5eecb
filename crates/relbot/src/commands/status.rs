//! Status command: what `prepare` would act on, without acting.

use anyhow::Context;
use camino::Utf8Path;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use relbot_core::artifacts::{self, PackageManifest};
use relbot_core::changeset::{ChangesetInventory, PendingChangeset};
use relbot_core::config::{self, Config};
use relbot_core::prepare::PrepareSettings;

/// Arguments for the `status` subcommand.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    config_file: Option<String>,
    settings: PrepareSettings,
    /// Manifest as it stands now, before any version command runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<PackageManifest>,
    pending: Vec<PendingChangeset>,
}

impl StatusReport {
    fn gather(config: &Config, cwd: &Utf8Path) -> anyhow::Result<Self> {
        let settings = PrepareSettings::from_config(config);
        let inventory = ChangesetInventory::new(cwd, &settings.changeset_dir);
        let pending = inventory
            .read()
            .with_context(|| format!("failed to read changesets from {}", inventory.dir()))?;
        let package = match artifacts::read_manifest(&cwd.join(&settings.package_dir)) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!(error = %e, "package manifest unavailable");
                None
            }
        };

        Ok(Self {
            config_file: config::find_project_config(cwd).map(|p| p.to_string()),
            settings,
            package,
            pending,
        })
    }
}

/// Show pending changesets and the settings `prepare` would use.
#[instrument(name = "cmd_status", skip_all, fields(json_output))]
pub fn cmd_status(
    _args: StatusArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing status command");

    let report = StatusReport::gather(config, cwd)?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let s = &report.settings;
    println!("{}", "Release".bold().underline());
    match report.config_file {
        Some(ref path) => println!("  {}: {}", "Config file".dimmed(), path.cyan()),
        None => println!("  {}: {}", "Config file".dimmed(), "none loaded".yellow()),
    }
    println!(
        "  {}: {} {} {}",
        "Branches".dimmed(),
        s.base_branch.cyan(),
        "→".dimmed(),
        s.release_branch.cyan()
    );
    println!("  {}: {}", "Remote".dimmed(), s.remote);
    println!("  {}: {}", "Package dir".dimmed(), s.package_dir);
    if let Some(ref pkg) = report.package {
        println!(
            "  {}: {}@{}",
            "Package".dimmed(),
            pkg.name.bold(),
            pkg.version.green()
        );
    }
    println!("  {}: {}", "Version command".dimmed(), s.version_command.cyan());
    println!("  {}: {}", "Duplicates".dimmed(), s.on_multiple);
    println!();

    println!("{}", "Pending changesets".bold().underline());
    if report.pending.is_empty() {
        println!("  {} None; prepare has nothing to do", "○".yellow());
        return Ok(());
    }
    for changeset in &report.pending {
        let releases = changeset
            .releases
            .iter()
            .map(|r| format!("{}: {}", r.package, r.bump))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {} {}", "•".cyan(), changeset.id.bold());
        if !releases.is_empty() {
            println!("    {}", releases.dimmed());
        }
        if let Some(line) = changeset.summary.lines().find(|l| !l.trim().is_empty()) {
            println!("    {line}");
        }
    }

    Ok(())
}
