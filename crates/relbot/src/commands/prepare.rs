//! Prepare command: thin CLI layer over `relbot_core::prepare`.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use owo_colors::OwoColorize;
use tracing::{debug, instrument, warn};

use relbot_core::bump::CommandBumper;
use relbot_core::changeset::ChangesetInventory;
use relbot_core::config::Config;
use relbot_core::git::GitCli;
use relbot_core::github::{self, GhCli, RepoSlug};
use relbot_core::prepare::{
    PhaseOutcome, Pipeline, PrepareEvent, PrepareOutcome, PrepareSettings, PreparedRelease,
};
use relbot_core::reconcile::DuplicatePolicy;
use relbot_core::release_pr::UpsertAction;

/// Arguments for the `prepare` subcommand.
#[derive(Args, Debug, Default)]
pub struct PrepareArgs {
    /// Report what would run without touching the branch or the API
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Branch to force-push the release commit to
    #[arg(long, value_name = "BRANCH")]
    pub release_branch: Option<String>,

    /// Branch to rebuild the release branch from
    #[arg(long, value_name = "BRANCH")]
    pub base_branch: Option<String>,

    /// Package directory containing package.json and CHANGELOG.md
    #[arg(long, value_name = "DIR")]
    pub package_dir: Option<Utf8PathBuf>,

    /// Command that applies pending changesets
    #[arg(long, value_name = "CMD")]
    pub version_command: Option<String>,

    /// Repository as OWNER/REPO
    #[arg(long, value_name = "OWNER/REPO")]
    pub repo: Option<String>,

    /// What to do when several release PRs are open
    #[arg(long, value_enum)]
    pub on_multiple: Option<DuplicatePolicy>,
}

impl PrepareArgs {
    /// Config-derived settings with this invocation's flags applied.
    pub fn settings(&self, config: &Config) -> PrepareSettings {
        let mut settings = PrepareSettings::from_config(config);
        if let Some(v) = &self.release_branch {
            settings.release_branch.clone_from(v);
        }
        if let Some(v) = &self.base_branch {
            settings.base_branch.clone_from(v);
        }
        if let Some(v) = &self.package_dir {
            settings.package_dir.clone_from(v);
        }
        if let Some(v) = &self.version_command {
            settings.version_command.clone_from(v);
        }
        if let Some(v) = &self.repo {
            settings.repository = Some(v.clone());
        }
        if let Some(v) = self.on_multiple {
            settings.on_multiple = v;
        }
        settings.dry_run = self.dry_run;
        settings
    }
}

/// Execute the prepare command.
#[instrument(name = "cmd_prepare", skip_all, fields(json_output))]
pub fn cmd_prepare(
    args: PrepareArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing prepare command");

    let settings = args.settings(config);
    let pending = ChangesetInventory::new(cwd, &settings.changeset_dir)
        .count()
        .ok();
    let repo = resolve_repo(cwd, &settings, pending)?;

    if !global_json {
        if settings.dry_run {
            println!("\n{}", "DRY RUN: no changes will be made".yellow().bold());
        }
        println!(
            "\n{}: {} {} {}  {}",
            "Release".bold(),
            settings.base_branch.cyan(),
            "→".dimmed(),
            settings.release_branch.cyan(),
            format!("({repo})").dimmed(),
        );
        println!();
    }

    let will_publish = !settings.dry_run && pending != Some(0);
    if will_publish && !global_json && !confirm(&args, config, &settings)? {
        println!("{}", "Prepare cancelled.".yellow());
        return Ok(());
    }

    let mut pipeline = Pipeline::new(
        GitCli::new(cwd, settings.remote.clone()),
        CommandBumper::new(settings.version_command.clone()),
        GhCli::new(cwd, repo),
    );

    let mut spinner: Option<ProgressBar> = None;
    let outcome = pipeline
        .run(cwd, &settings, |event| {
            if !global_json {
                handle_event(event, &mut spinner);
            }
        })
        .inspect_err(|e| debug!(phase = %e.phase, kind = %e.kind(), "prepare failed"))
        .context("release preparation failed")?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!();
    match outcome {
        PrepareOutcome::NoChangesets => {
            println!("{} No changesets found, nothing to release", "✓".green());
        }
        PrepareOutcome::DryRun {
            pending_changesets, ..
        } => {
            println!(
                "{} Dry run complete: {pending_changesets} pending changeset(s) would be released",
                "✓".green(),
            );
        }
        PrepareOutcome::Prepared(release) => print_prepared(&release),
    }

    Ok(())
}

/// Resolve `owner/repo`, tolerating failure when the API will not be called.
fn resolve_repo(
    cwd: &Utf8Path,
    settings: &PrepareSettings,
    pending: Option<usize>,
) -> anyhow::Result<RepoSlug> {
    match github::resolve_repo_slug(cwd, settings.repository.as_deref(), &settings.remote) {
        Ok(repo) => Ok(repo),
        // A failing or empty inventory stops the run before any API call.
        Err(e) if settings.dry_run || !matches!(pending, Some(n) if n > 0) => {
            warn!(error = %e, "repository unknown; no pull request will be written");
            Ok(RepoSlug {
                owner: "unknown".into(),
                name: "unknown".into(),
            })
        }
        Err(e) => Err(e).context("could not determine the GitHub repository"),
    }
}

/// Ask before force-pushing, unless told not to or not on a terminal.
fn confirm(args: &PrepareArgs, config: &Config, settings: &PrepareSettings) -> anyhow::Result<bool> {
    let config_confirm = config
        .prepare
        .as_ref()
        .and_then(|p| p.confirm)
        .unwrap_or(true);
    let interactive = std::io::IsTerminal::is_terminal(&std::io::stdin());
    if args.yes || !config_confirm || !interactive {
        return Ok(true);
    }

    Confirm::new(&format!(
        "Reset '{}' to '{}/{}' and force-push it?",
        settings.release_branch, settings.remote, settings.base_branch
    ))
    .with_default(true)
    .with_help_message("Anything on the release branch that is not on the base branch is discarded")
    .prompt()
    .context("confirmation prompt failed")
}

fn handle_event(event: PrepareEvent, spinner: &mut Option<ProgressBar>) {
    match event {
        PrepareEvent::PhaseStarted(phase) => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("  {spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
            bar.set_message(format!("{phase}..."));
            bar.enable_steady_tick(std::time::Duration::from_millis(80));
            *spinner = Some(bar);
        }
        PrepareEvent::PhaseCompleted(phase, outcome) => {
            if let Some(bar) = spinner.take() {
                bar.finish_and_clear();
            }
            match outcome {
                PhaseOutcome::Success { message } => {
                    println!(
                        "  {} {} {}",
                        "✓".green(),
                        phase.to_string().bold(),
                        message.dimmed()
                    );
                }
                PhaseOutcome::Skipped { reason } => {
                    println!(
                        "  {} {} {}",
                        "–".yellow(),
                        phase.to_string().bold(),
                        format!("skipped: {reason}").dimmed()
                    );
                }
            }
        }
        PrepareEvent::PhaseFailed(phase) => {
            if let Some(bar) = spinner.take() {
                bar.finish_and_clear();
            }
            println!("  {} {}", "✗".red(), phase.to_string().bold());
        }
    }
}

fn print_prepared(release: &PreparedRelease) {
    let pr = &release.pull_request;
    let verb = match pr.action {
        UpsertAction::Created => "Opened",
        UpsertAction::Updated => "Updated",
    };
    println!(
        "{} {} release PR #{} for {}",
        "✓".green().bold(),
        verb,
        pr.pull_request.number,
        format!("{}@{}", release.package, release.version).green().bold(),
    );
    if let Some(url) = &pr.pull_request.html_url {
        println!("  {}", url.cyan());
    }
    if let Some(level) = release.highest_level {
        println!("  {}: {level}", "Bump".dimmed());
    }
    if !pr.duplicates.is_empty() {
        println!(
            "  {} other open release PRs left untouched: {}",
            "!".yellow(),
            join_numbers(&pr.duplicates)
        );
    }
    if !pr.closed.is_empty() {
        println!(
            "  {} closed duplicate release PRs: {}",
            "→".dimmed(),
            join_numbers(&pr.closed)
        );
    }
}

fn join_numbers(numbers: &[u64]) -> String {
    numbers
        .iter()
        .map(|n| format!("#{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
