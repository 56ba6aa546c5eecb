//! Configuration loading and discovery.
//!
//! Sources are merged lowest to highest precedence:
//! 1. Built-in defaults
//! 2. User config in the platform config directory
//!    (`~/.config/relbot/config.<ext>` on Linux)
//! 3. Project config: `.relbot.<ext>` or `relbot.<ext>`, searched from the
//!    starting directory upwards until a `.git` boundary
//! 4. Files passed explicitly (`--config`)
//!
//! Where `<ext>` is one of: `toml`, `yaml`, `yml`, `json`
//!
//! # Example
//! ```no_run
//! use camino::Utf8PathBuf;
//! use relbot_core::config::ConfigLoader;
//!
//! let cwd = std::env::current_dir().unwrap();
//! let cwd = Utf8PathBuf::try_from(cwd).expect("current directory is not valid UTF-8");
//! let config = ConfigLoader::new()
//!     .with_project_search(&cwd)
//!     .load()
//!     .unwrap();
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::reconcile::DuplicatePolicy;

/// The configuration for relbot.
///
/// Every section is optional; unset values fall back to the defaults of
/// [`PrepareSettings`](crate::prepare::PrepareSettings).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files.
    pub log_dir: Option<Utf8PathBuf>,
    /// Branches, package location and templates.
    pub release: Option<ReleaseConfig>,
    /// Remote and committer identity.
    pub git: Option<GitConfig>,
    /// Code-hosting settings.
    pub github: Option<GitHubConfig>,
    /// `relbot prepare` behavior.
    pub prepare: Option<PrepareConfig>,
}

/// The `[release]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReleaseConfig {
    /// Branch the release commit is force-pushed to (default: `release`).
    pub release_branch: Option<String>,
    /// Branch the release branch is rebuilt from (default: `next`).
    pub base_branch: Option<String>,
    /// Package directory relative to the repository root.
    pub package_dir: Option<Utf8PathBuf>,
    /// Command that applies pending changesets.
    pub version_command: Option<String>,
    /// Changeset directory relative to the repository root (default: `.changeset`).
    pub changeset_dir: Option<String>,
    /// Pull request title template. Supports `{name}` and `{version}`.
    pub title: Option<String>,
    /// Release commit message template. Supports `{name}` and `{version}`.
    pub commit_message: Option<String>,
    /// What to do when several release pull requests are open.
    pub on_multiple: Option<DuplicatePolicy>,
}

/// The `[git]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GitConfig {
    /// Remote to fetch the base branch from and push the release branch to.
    pub remote: Option<String>,
    /// Committer name for the release commit.
    pub user_name: Option<String>,
    /// Committer email for the release commit.
    pub user_email: Option<String>,
}

/// The `[github]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GitHubConfig {
    /// `owner/repo`. Falls back to `GITHUB_REPOSITORY`, then the remote URL.
    pub repository: Option<String>,
}

/// The `[prepare]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PrepareConfig {
    /// Ask before mutating the branch when run interactively (default: true).
    ///
    /// The `--yes`/`-y` flag overrides this at runtime.
    pub confirm: Option<bool>,
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Supported configuration file extensions (in order of preference).
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for XDG directory lookup and config file names.
const APP_NAME: &str = "relbot";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    project_search_root: Option<Utf8PathBuf>,
    include_user_config: bool,
    boundary_marker: Option<String>,
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// A loader that reads user config and stops project search at `.git`.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Walk up from `path` looking for a project config file.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Whether to read the user config file.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Stop the upward search in a parent directory containing `marker`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Search all the way to the filesystem root.
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file. Later files win.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration, merging all discovered sources.
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load(self) -> ConfigResult<Config> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if self.include_user_config
            && let Some(user_config) = find_user_config()
        {
            tracing::debug!(path = %user_config, "merging user config");
            figment = merge_file(figment, &user_config);
        }

        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            tracing::debug!(path = %project_config, "merging project config");
            figment = merge_file(figment, &project_config);
        }

        for file in &self.explicit_files {
            figment = merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            for ext in CONFIG_EXTENSIONS {
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }

                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            // The repository root is the last directory searched.
            if let Some(ref marker) = self.boundary_marker
                && dir.join(marker).exists()
            {
                break;
            }

            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }
}

fn find_user_config() -> Option<Utf8PathBuf> {
    let config_dir = user_config_dir()?;
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| config_dir.join(format!("config.{ext}")))
        .find(|path| path.is_file())
}

/// Merge a config file into the figment, detecting format from extension.
fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
    match path.extension() {
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
        Some("json") => figment.merge(Json::file_exact(path.as_str())),
        _ => figment.merge(Toml::file_exact(path.as_str())),
    }
}

/// Find the project config file path without loading it.
pub fn find_project_config<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    ConfigLoader::new()
        .with_project_search(start.as_ref())
        .find_project_config(start.as_ref())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// The user config directory, e.g. `~/.config/relbot/` on Linux.
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.config_dir().to_path_buf()).ok()
}

/// The user data directory, e.g. `~/.local/share/relbot/` on Linux.
pub fn user_data_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.data_dir().to_path_buf()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, body: &str) -> Utf8PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        Utf8PathBuf::try_from(path).unwrap()
    }

    fn load_file(path: &Utf8Path) -> Config {
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(path)
            .load()
            .unwrap()
    }

    #[test]
    fn default_config_has_no_sections() {
        let config = Config::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.log_dir.is_none());
        assert!(config.release.is_none());
        assert!(config.git.is_none());
        assert!(config.github.is_none());
        assert!(config.prepare.is_none());
    }

    #[test]
    fn loads_defaults_without_files() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn full_toml_config() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "relbot.toml",
            r#"
log_level = "debug"
log_dir = "/tmp/relbot"

[release]
release_branch = "release/next"
base_branch = "main"
package_dir = "packages/widgets"
version_command = "npx changeset version"
changeset_dir = ".changes"
title = "chore: release {version}"
commit_message = "chore(release): {name} {version}"
on_multiple = "close-extras"

[git]
remote = "upstream"
user_name = "Release Bot"
user_email = "bot@example.com"

[github]
repository = "acme/widgets"

[prepare]
confirm = false
"#,
        );

        let config = load_file(&path);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.log_dir.as_deref().map(Utf8Path::as_str), Some("/tmp/relbot"));

        let release = config.release.unwrap();
        assert_eq!(release.release_branch.as_deref(), Some("release/next"));
        assert_eq!(release.base_branch.as_deref(), Some("main"));
        assert_eq!(
            release.package_dir.as_deref().map(Utf8Path::as_str),
            Some("packages/widgets")
        );
        assert_eq!(release.on_multiple, Some(DuplicatePolicy::CloseExtras));
        assert_eq!(config.git.unwrap().remote.as_deref(), Some("upstream"));
        assert_eq!(
            config.github.unwrap().repository.as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(config.prepare.unwrap().confirm, Some(false));
    }

    #[test]
    fn yaml_and_json_configs() {
        let tmp = TempDir::new().unwrap();
        let yaml = write_config(
            &tmp,
            "relbot.yaml",
            "release:\n  base_branch: main\n  on_multiple: update-first\n",
        );
        let release = load_file(&yaml).release.unwrap();
        assert_eq!(release.base_branch.as_deref(), Some("main"));
        assert_eq!(release.on_multiple, Some(DuplicatePolicy::UpdateFirst));

        let json = write_config(&tmp, "relbot.json", r#"{"github":{"repository":"a/b"}}"#);
        assert_eq!(
            load_file(&json).github.unwrap().repository.as_deref(),
            Some("a/b")
        );
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "bad.toml", "[release]\non_multiple = \"panic\"\n");
        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn later_file_overrides_earlier() {
        let tmp = TempDir::new().unwrap();
        let base = write_config(&tmp, "base.toml", "[release]\nbase_branch = \"next\"\n");
        let over = write_config(&tmp, "over.toml", "[release]\nbase_branch = \"main\"\n");

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&base)
            .with_file(&over)
            .load()
            .unwrap();
        assert_eq!(config.release.unwrap().base_branch.as_deref(), Some("main"));
    }

    #[test]
    fn project_config_found_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project");
        let deep = project.join("packages").join("widgets");
        fs::create_dir_all(&deep).unwrap();
        fs::write(project.join(".relbot.toml"), r#"log_level = "warn""#).unwrap();

        let deep = Utf8PathBuf::try_from(deep).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&deep)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn dotfile_preferred_over_plain_name() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".relbot.toml"), r#"log_level = "error""#).unwrap();
        fs::write(tmp.path().join("relbot.toml"), r#"log_level = "debug""#).unwrap();

        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let found = find_project_config(&root).unwrap();
        assert_eq!(found.file_name(), Some(".relbot.toml"));
    }

    #[test]
    fn boundary_marker_stops_search() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("parent");
        let repo = parent.join("repo");
        let work = repo.join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(parent.join(".relbot.toml"), r#"log_level = "warn""#).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();

        let work = Utf8PathBuf::try_from(work).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(&work)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn config_at_repository_root_is_found() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        let work = repo.join("packages");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join("relbot.toml"), r#"log_level = "debug""#).unwrap();

        let work = Utf8PathBuf::try_from(work).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(&work)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn user_dirs_mention_app_name() {
        if let Some(path) = user_config_dir() {
            assert!(path.as_str().contains("relbot"));
        }
        if let Some(path) = user_data_dir() {
            assert!(path.as_str().contains("relbot"));
        }
    }
}
