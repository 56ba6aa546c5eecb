//! Extracting one version's section from a Markdown changelog.
//!
//! Sections start at an ATX heading (`## 1.2.0`, `## [1.2.0] - 2024-05-01`)
//! whose first word is the version. A section ends at the next heading of
//! the same level or at the end of the document. Headings inside fenced
//! code blocks are ignored.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// The changelog has no heading for the requested version.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("changelog has no section for version {version}")]
pub struct SectionNotFound {
    /// The version that was searched for.
    pub version: String,
}

/// Semver bump level named by a changelog sub-heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    /// `### Patch Changes`
    Patch,
    /// `### Minor Changes`
    Minor,
    /// `### Major Changes`
    Major,
}

impl std::fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// The body of one changelog section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangelogEntry {
    /// Version the section belongs to.
    pub version: String,
    /// Section body without its heading. Blank lines at either end are
    /// dropped; a non-empty body ends with a newline.
    pub content: String,
    /// Highest bump level named by a heading inside the section.
    pub highest_level: Option<BumpLevel>,
}

#[derive(Debug)]
struct Heading<'a> {
    line: usize,
    level: usize,
    text: &'a str,
}

/// Find the section for `version` in `document`.
///
/// The first matching heading wins if the version appears more than once.
#[instrument(skip(document), fields(bytes = document.len()))]
pub fn extract(document: &str, version: &str) -> Result<ChangelogEntry, SectionNotFound> {
    let lines: Vec<&str> = document.lines().collect();
    let headings = headings(&lines);

    let Some(start) = headings
        .iter()
        .position(|h| version_token(h.text) == Some(version))
    else {
        return Err(SectionNotFound {
            version: version.to_string(),
        });
    };
    let level = headings[start].level;

    let rest = &headings[start + 1..];
    let end = rest
        .iter()
        .find(|h| h.level == level)
        .map_or(lines.len(), |h| h.line);

    let highest_level = rest
        .iter()
        .take_while(|h| h.line < end)
        .filter_map(|h| bump_level(h.text))
        .max();

    let body = &lines[headings[start].line + 1..end];
    let content = trim_blank_lines(body);

    debug!(
        heading_line = headings[start].line + 1,
        body_lines = body.len(),
        ?highest_level,
        "extracted changelog section"
    );

    Ok(ChangelogEntry {
        version: version.to_string(),
        content,
        highest_level,
    })
}

/// Versions of every top-level section, in document order.
///
/// The section level is the level of the first heading that carries a
/// version-like token.
pub fn versions(document: &str) -> Vec<String> {
    let lines: Vec<&str> = document.lines().collect();
    let headings = headings(&lines);
    let Some(level) = headings
        .iter()
        .find(|h| version_token(h.text).is_some_and(looks_like_version))
        .map(|h| h.level)
    else {
        return Vec::new();
    };

    headings
        .iter()
        .filter(|h| h.level == level)
        .filter_map(|h| version_token(h.text))
        .map(str::to_string)
        .collect()
}

fn headings<'a>(lines: &[&'a str]) -> Vec<Heading<'a>> {
    let mut out = Vec::new();
    let mut fence: Option<&str> = None;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if indent <= 3 {
            let marker = if trimmed.starts_with("```") {
                Some("```")
            } else if trimmed.starts_with("~~~") {
                Some("~~~")
            } else {
                None
            };
            match (fence, marker) {
                (None, Some(m)) => {
                    fence = Some(m);
                    continue;
                }
                (Some(open), Some(m)) if open == m => {
                    fence = None;
                    continue;
                }
                _ => {}
            }
        }
        if fence.is_some() || indent > 3 {
            continue;
        }

        if let Some((level, text)) = parse_atx(trimmed) {
            out.push(Heading {
                line: idx,
                level,
                text,
            });
        }
    }

    out
}

/// Parse `## Heading text ##` into its level and text.
fn parse_atx(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    let text = rest.trim();
    let text = text.trim_end_matches('#').trim_end();
    Some((level, text))
}

/// First word of a heading, without surrounding `[` `]`.
fn version_token(text: &str) -> Option<&str> {
    text.split_whitespace()
        .next()
        .map(|word| word.trim_start_matches('[').trim_end_matches(']'))
        .filter(|word| !word.is_empty())
}

fn looks_like_version(token: &str) -> bool {
    token
        .trim_start_matches('v')
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
}

fn bump_level(text: &str) -> Option<BumpLevel> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("major") {
        Some(BumpLevel::Major)
    } else if lower.contains("minor") {
        Some(BumpLevel::Minor)
    } else if lower.contains("patch") {
        Some(BumpLevel::Patch)
    } else {
        None
    }
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => {
            let mut content = lines[start..=end].join("\n");
            content.push('\n');
            content
        }
        _ => String::new(),
    }
}
