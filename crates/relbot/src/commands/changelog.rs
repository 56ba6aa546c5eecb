//! Changelog command: print one version's section, as the release PR body would be.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use relbot_core::artifacts::{self, CHANGELOG_FILE};
use relbot_core::changelog;
use relbot_core::config::Config;
use relbot_core::prepare::PrepareSettings;

/// Arguments for the `changelog` subcommand.
#[derive(Args, Debug, Default)]
pub struct ChangelogArgs {
    /// Version to extract (defaults to the package.json version)
    pub version: Option<String>,

    /// Changelog file (defaults to CHANGELOG.md in the package directory)
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<Utf8PathBuf>,

    /// List the versions the changelog has sections for
    #[arg(long, conflicts_with = "version")]
    pub list: bool,
}

/// Extract and print a changelog section.
#[instrument(name = "cmd_changelog", skip_all, fields(json_output))]
pub fn cmd_changelog(
    args: ChangelogArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing changelog command");

    let settings = PrepareSettings::from_config(config);
    let package_dir = cwd.join(&settings.package_dir);
    let path = args
        .file
        .as_ref()
        .map_or_else(|| package_dir.join(CHANGELOG_FILE), |f| cwd.join(f));
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;

    if args.list {
        let versions = changelog::versions(&text);
        if global_json {
            println!("{}", serde_json::to_string_pretty(&versions)?);
        } else {
            for v in versions {
                println!("{v}");
            }
        }
        return Ok(());
    }

    let version = match args.version {
        Some(v) => v,
        None => {
            artifacts::read_manifest(&package_dir)
                .context("no version given and package.json could not be read")?
                .version
        }
    };

    let entry = changelog::extract(&text, &version).with_context(|| format!("in {path}"))?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        if let Some(level) = entry.highest_level {
            eprintln!("{} {} ({level})", "#".dimmed(), entry.version.bold());
        }
        print!("{}", entry.content);
    }

    Ok(())
}
