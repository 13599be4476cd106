//! Locator model and the read-only selector catalog.
//!
//! Selectors come from a JSON document grouped by site section. A value is
//! either a single selector string or an ordered list of them; list order is
//! the priority order of the candidates.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    XPath,
    Css,
}

/// One candidate selector for an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    kind: LocatorKind,
    value: String,
}

impl Locator {
    /// Classify a raw selector: a leading `/` or `(` means XPath, anything else is CSS.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim().to_string();
        let kind = if value.starts_with('/') || value.starts_with('(') {
            LocatorKind::XPath
        } else {
            LocatorKind::Css
        };
        Self { kind, value }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::Css,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::XPath,
            value: value.into(),
        }
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocatorKind::XPath => write!(f, "xpath:{}", self.value),
            LocatorKind::Css => write!(f, "css:{}", self.value),
        }
    }
}

/// Ordered candidates for one logical element. First match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorSet {
    name: String,
    locators: Vec<Locator>,
}

impl LocatorSet {
    pub fn new(name: impl Into<String>, locators: Vec<Locator>) -> Self {
        Self {
            name: name.into(),
            locators,
        }
    }

    pub fn from_strings<S: AsRef<str>>(name: impl Into<String>, raw: &[S]) -> Self {
        let locators = raw
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !s.trim().is_empty())
            .map(Locator::parse)
            .collect();
        Self::new(name, locators)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }
}

/// Raw selector document as loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct RawSelectors {
    root: Value,
}

impl RawSelectors {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text).context("Failed to parse selectors JSON")?;
        if !root.is_object() {
            anyhow::bail!("Selectors document must be a JSON object");
        }
        Ok(Self { root })
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read selectors file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid selectors file {}", path.display()))
    }

    /// Look up `section` then walk the dotted `key` through nested objects.
    /// Strings and arrays of strings both resolve to a list; anything else is absent.
    pub fn lookup(&self, section: &str, key: &str) -> Option<Vec<String>> {
        let mut node = self.root.get(section)?;
        for part in key.split('.') {
            node = node.get(part)?;
        }
        match node {
            Value::String(s) if !s.trim().is_empty() => Some(vec![s.clone()]),
            Value::Array(items) => {
                let list: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string)
                    .collect();
                (!list.is_empty()).then_some(list)
            }
            _ => None,
        }
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.root.get(section).map(Value::is_object).unwrap_or(false)
    }
}

/// Declares a logical element and the configuration keys that may hold its selectors.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub name: String,
    pub key_aliases: Vec<String>,
    pub required: bool,
}

impl ElementSpec {
    pub fn required(name: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            name: name.into(),
            key_aliases: aliases.iter().map(|s| s.to_string()).collect(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            required: false,
            ..Self::required(name, aliases)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("selector section '{0}' is missing")]
    MissingSection(String),

    #[error("no selectors for required element '{element}' in '{section}' (tried keys: {tried})")]
    MissingElement {
        section: String,
        element: String,
        tried: String,
    },
}

/// Logical element name to candidate locators, resolved once and never mutated.
#[derive(Debug, Clone, Default)]
pub struct SelectorCatalog {
    section: String,
    sets: HashMap<String, Arc<LocatorSet>>,
}

impl SelectorCatalog {
    /// Resolve every spec against `section`, taking the first alias that is present.
    pub fn resolve(
        raw: &RawSelectors,
        section: &str,
        specs: &[ElementSpec],
    ) -> std::result::Result<Self, CatalogError> {
        if !raw.has_section(section) {
            return Err(CatalogError::MissingSection(section.to_string()));
        }

        let mut sets = HashMap::new();
        for spec in specs {
            let found = spec
                .key_aliases
                .iter()
                .find_map(|key| raw.lookup(section, key).map(|list| (key, list)));

            match found {
                Some((key, list)) => {
                    log::debug!(
                        "Selector '{}.{}' resolved from key '{}' ({} candidate(s))",
                        section,
                        spec.name,
                        key,
                        list.len()
                    );
                    sets.insert(
                        spec.name.clone(),
                        Arc::new(LocatorSet::from_strings(spec.name.clone(), &list)),
                    );
                }
                None if spec.required => {
                    return Err(CatalogError::MissingElement {
                        section: section.to_string(),
                        element: spec.name.clone(),
                        tried: spec.key_aliases.join(", "),
                    });
                }
                None => {
                    log::debug!("Optional selector '{}.{}' not configured", section, spec.name);
                }
            }
        }

        Ok(Self {
            section: section.to_string(),
            sets,
        })
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn get(&self, name: &str) -> Option<Arc<LocatorSet>> {
        self.sets.get(name).cloned()
    }

    /// Fetch an element that was declared required; absent only if it was never declared.
    pub fn require(&self, name: &str) -> std::result::Result<Arc<LocatorSet>, CatalogError> {
        self.get(name).ok_or_else(|| CatalogError::MissingElement {
            section: self.section.clone(),
            element: name.to_string(),
            tried: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> RawSelectors {
        RawSelectors::from_value(json!({
            "chatgpt": {
                "prompt_textarea": ["#prompt-textarea", "//textarea[@id='prompt']"],
                "submit_button": "button[data-testid='send-button']",
                "empty_list": [],
            },
            "capcut": {
                "styles": { "anime": ["//div[text()='Anime']", ".style-anime"] },
                "export_options": { "resolution": { "1080p": "(//li)[3]" } }
            }
        }))
    }

    #[test]
    fn test_locator_kind_from_prefix() {
        assert_eq!(Locator::parse("//div").kind(), LocatorKind::XPath);
        assert_eq!(Locator::parse("(//li)[2]").kind(), LocatorKind::XPath);
        assert_eq!(Locator::parse("#send").kind(), LocatorKind::Css);
        assert_eq!(Locator::parse("  div > a ").value(), "div > a");
    }

    #[test]
    fn test_dotted_lookup() {
        let raw = raw();
        assert_eq!(
            raw.lookup("capcut", "export_options.resolution.1080p"),
            Some(vec!["(//li)[3]".to_string()])
        );
        assert_eq!(raw.lookup("capcut", "styles.anime").map(|v| v.len()), Some(2));
        assert_eq!(raw.lookup("capcut", "styles.retro"), None);
        assert_eq!(raw.lookup("chatgpt", "empty_list"), None);
    }

    #[test]
    fn test_alias_resolution_keeps_order() {
        let specs = vec![
            ElementSpec::required("prompt", &["prompt_input", "prompt_textarea"]),
            ElementSpec::required("send", &["send_button", "submit_button"]),
            ElementSpec::optional("regenerate", &["response_regenerate_button"]),
        ];
        let catalog = SelectorCatalog::resolve(&raw(), "chatgpt", &specs).unwrap();

        let prompt = catalog.require("prompt").unwrap();
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt.locators()[0], Locator::css("#prompt-textarea"));
        assert_eq!(prompt.locators()[1].kind(), LocatorKind::XPath);
        assert!(catalog.get("regenerate").is_none());
    }

    #[test]
    fn test_missing_required_element_names_aliases() {
        let specs = vec![ElementSpec::required(
            "response",
            &["response_area_last", "response_output_last"],
        )];
        let err = SelectorCatalog::resolve(&raw(), "chatgpt", &specs).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("response_area_last, response_output_last"));
    }

    #[test]
    fn test_missing_section() {
        let err = SelectorCatalog::resolve(&raw(), "grok", &[]).unwrap_err();
        assert!(matches!(err, CatalogError::MissingSection(s) if s == "grok"));
    }
}
