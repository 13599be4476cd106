//! Generated script text: structural validation, metadata extraction, persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Section markers a generated script is expected to carry, in document order.
pub const SECTION_MARKERS: [Section; 4] = [
    Section::Script,
    Section::Title,
    Section::Description,
    Section::Keywords,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Script,
    Title,
    Description,
    Keywords,
}

impl Section {
    pub fn marker(&self) -> &'static str {
        match self {
            Section::Script => "SCRIPT:",
            Section::Title => "TITLE:",
            Section::Description => "DESCRIPTION:",
            Section::Keywords => "KEYWORDS:",
        }
    }

    /// Match a line that starts with this marker, ignoring case and leading spaces.
    /// Returns the rest of the line after the marker.
    fn strip<'a>(&self, line: &'a str) -> Option<&'a str> {
        let trimmed = line.trim_start();
        let marker = self.marker();
        let head = trimmed.get(..marker.len())?;
        head.eq_ignore_ascii_case(marker)
            .then(|| &trimmed[marker.len()..])
    }
}

/// How strictly to treat a response with only some of the markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// No markers is an error; some missing is a warning.
    #[default]
    Lenient,
    /// Any missing marker is an error.
    Strict,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response is empty")]
    Empty,

    #[error("response contains none of the required sections ({expected})")]
    NoSections { expected: String },

    #[error("response is missing required sections: {missing}")]
    MissingSections { missing: String },
}

/// Result of a passing validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub found: Vec<Section>,
    pub missing: Vec<Section>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub fn validate_response(
    text: &str,
    policy: ValidationPolicy,
) -> std::result::Result<ValidationReport, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let (found, missing): (Vec<Section>, Vec<Section>) = SECTION_MARKERS
        .iter()
        .copied()
        .partition(|section| text.lines().any(|line| section.strip(line).is_some()));

    if found.is_empty() {
        return Err(ValidationError::NoSections {
            expected: marker_list(&SECTION_MARKERS),
        });
    }

    if !missing.is_empty() {
        match policy {
            ValidationPolicy::Strict => {
                return Err(ValidationError::MissingSections {
                    missing: marker_list(&missing),
                });
            }
            ValidationPolicy::Lenient => {
                log::warn!(
                    "Response is missing sections {}; downstream fields will be empty",
                    marker_list(&missing)
                );
            }
        }
    }

    Ok(ValidationReport { found, missing })
}

fn marker_list(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.marker())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fields parsed from a generated script.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptMetadata {
    pub script: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl ScriptMetadata {
    /// Split the text into sections. A section runs from its marker to the next marker.
    /// Missing or blank sections stay `None` (or an empty tag list).
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<(Section, Vec<&str>)> = Vec::new();

        for line in text.lines() {
            let started = SECTION_MARKERS
                .iter()
                .find_map(|section| section.strip(line).map(|rest| (*section, rest)));
            match started {
                Some((section, rest)) => sections.push((section, vec![rest])),
                None => {
                    if let Some((_, body)) = sections.last_mut() {
                        body.push(line);
                    }
                }
            }
        }

        let take = |wanted: Section| -> Option<String> {
            sections
                .iter()
                .find(|(section, _)| *section == wanted)
                .map(|(_, body)| body.join("\n").trim().to_string())
                .filter(|body| !body.is_empty())
        };

        let tags = take(Section::Keywords)
            .map(|raw| {
                raw.split(',')
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            script: take(Section::Script),
            title: take(Section::Title),
            description: take(Section::Description),
            tags,
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script file {}", path.display()))?;
        Ok(Self::parse(&content))
    }
}

/// Write the text to `generated_script_<timestamp>.txt` under `dir`.
pub async fn save_script(dir: &Path, text: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create scripts dir {}", dir.display()))?;

    let file_name = format!(
        "generated_script_{}.txt",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(file_name);
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("Failed to write script {}", path.display()))?;

    log::info!("Saved script to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "SCRIPT:\nLine one.\nLine two.\n\nTITLE: Rust in 60 seconds\n\
                        DESCRIPTION: A quick tour.\nKEYWORDS: rust, systems , ,async\n";

    #[test]
    fn test_full_response_is_complete() {
        let report = validate_response(FULL, ValidationPolicy::Strict).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.found.len(), 4);
    }

    #[test]
    fn test_no_markers_fails_either_policy() {
        let text = "Here is a great video idea about Rust!";
        for policy in [ValidationPolicy::Lenient, ValidationPolicy::Strict] {
            assert!(matches!(
                validate_response(text, policy),
                Err(ValidationError::NoSections { .. })
            ));
        }
    }

    #[test]
    fn test_partial_markers_pass_lenient_only() {
        let text = "script: body\ntitle: T\ndescription: D\n";
        let report = validate_response(text, ValidationPolicy::Lenient).unwrap();
        assert_eq!(report.missing, vec![Section::Keywords]);

        let err = validate_response(text, ValidationPolicy::Strict).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingSections {
                missing: "KEYWORDS:".into()
            }
        );
    }

    #[test]
    fn test_marker_must_start_line() {
        let text = "The TITLE: of this is not a header";
        assert!(validate_response(text, ValidationPolicy::Lenient).is_err());
    }

    #[test]
    fn test_parse_sections() {
        let meta = ScriptMetadata::parse(FULL);
        assert_eq!(meta.script.as_deref(), Some("Line one.\nLine two."));
        assert_eq!(meta.title.as_deref(), Some("Rust in 60 seconds"));
        assert_eq!(meta.description.as_deref(), Some("A quick tour."));
        assert_eq!(meta.tags, vec!["rust", "systems", "async"]);
    }

    #[test]
    fn test_parse_missing_keywords_gives_empty_tags() {
        let meta = ScriptMetadata::parse("Script: hello\nTitle: t\nDescription:\n");
        assert_eq!(meta.script.as_deref(), Some("hello"));
        assert_eq!(meta.description, None);
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let text = "script: body\ntitle: T\ndescription: D\n";
        let first = ScriptMetadata::parse(text);
        let second = ScriptMetadata::parse(text);
        assert_eq!(first, second);
        assert_eq!(first.script.as_deref(), Some("body"));
        assert_eq!(first.title.as_deref(), Some("T"));
        assert_eq!(first.description.as_deref(), Some("D"));
        assert!(first.tags.is_empty());
    }

    #[test]
    fn test_non_ascii_line_does_not_panic() {
        let meta = ScriptMetadata::parse("é\nTITLE: ok");
        assert_eq!(meta.title.as_deref(), Some("ok"));
    }
}
