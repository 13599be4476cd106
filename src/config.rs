//! Run configuration loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::browser::{BrowserFamily, InteractionTiming, SessionSettings, Timeouts};
use crate::retry::Backoff;
use crate::script::ValidationPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub browser: BrowserSection,
    pub ai: AiConfig,
    pub video: VideoConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub scripts_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub selectors_file: PathBuf,
    pub log_file: Option<PathBuf>,
    pub uploaded_videos_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("scripts"),
            videos_dir: PathBuf::from("videos"),
            downloads_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads")),
            diagnostics_dir: PathBuf::from("logs/diagnostics"),
            selectors_file: PathBuf::from("selectors.json"),
            log_file: None,
            uploaded_videos_log: PathBuf::from("logs/uploaded_videos.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub primary_browser: BrowserFamily,
    pub secondary_browser: Option<BrowserFamily>,
    pub headless_mode: bool,
    pub debugger_port: Option<u16>,
    pub user_data_dir: Option<PathBuf>,
    /// Seconds to wait for an element.
    pub wait_timeout: u64,
    /// Seconds to wait for a document to load.
    pub page_load_timeout: u64,
    pub retry_attempts: u32,
    pub window_width: u32,
    pub window_height: u32,
    pub poll_interval_ms: u64,
    pub screenshot_on_error: bool,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            primary_browser: BrowserFamily::Chrome,
            secondary_browser: Some(BrowserFamily::Edge),
            headless_mode: false,
            debugger_port: None,
            user_data_dir: None,
            wait_timeout: 20,
            page_load_timeout: 60,
            retry_attempts: 3,
            window_width: 1920,
            window_height: 1080,
            poll_interval_ms: 500,
            screenshot_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Chatgpt,
    Grok,
    /// External command reading the prompt on stdin.
    Command,
}

impl AiProvider {
    /// Selector section for browser-driven providers.
    pub fn section(&self) -> Option<&'static str> {
        match self {
            AiProvider::Chatgpt => Some("chatgpt"),
            AiProvider::Grok => Some("grok"),
            AiProvider::Command => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub prompt: String,
    pub chatgpt_url: String,
    pub grok_url: String,
    pub command: Option<CommandSpec>,
    /// Seconds to wait for a response to finish.
    pub response_timeout: u64,
    pub validation: ValidationPolicy,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::Chatgpt,
            prompt: String::new(),
            chatgpt_url: "https://chatgpt.com/".into(),
            grok_url: "https://grok.com/".into(),
            command: None,
            response_timeout: 180,
            validation: ValidationPolicy::Lenient,
        }
    }
}

impl AiConfig {
    pub fn url(&self) -> Option<&str> {
        match self.provider {
            AiProvider::Chatgpt => Some(&self.chatgpt_url),
            AiProvider::Grok => Some(&self.grok_url),
            AiProvider::Command => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub url: String,
    pub style: String,
    pub voice: String,
    pub resolution: String,
    pub frame_rate: String,
    pub generation_timeout: u64,
    pub download_timeout: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            url: "https://www.capcut.com/".into(),
            style: "default".into(),
            voice: "default".into(),
            resolution: "1080p".into(),
            frame_rate: "30fps".into(),
            generation_timeout: 300,
            download_timeout: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub command: Option<CommandSpec>,
    pub privacy_status: String,
    pub category_id: String,
    pub notify_subscribers: bool,
    pub retry_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            command: None,
            privacy_status: "private".into(),
            category_id: "22".into(),
            notify_subscribers: false,
            retry_attempts: 3,
        }
    }
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(text).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load, resolve relative paths against the file's directory, and create output dirs.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::from_json(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.create_dirs().await?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.browser.retry_attempts == 0 {
            anyhow::bail!("browser.retry_attempts must be at least 1");
        }
        if self.ai.provider == AiProvider::Command && self.ai.command.is_none() {
            anyhow::bail!("ai.provider is 'command' but ai.command is not set");
        }
        Ok(())
    }

    /// Non-fatal problems, reported by the caller once logging is up.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.browser.secondary_browser == Some(self.browser.primary_browser) {
            warnings.push(
                "Secondary browser equals primary browser; fallback will be skipped".to_string(),
            );
        }
        warnings
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        let paths = &mut self.paths;
        resolve(&mut paths.scripts_dir);
        resolve(&mut paths.videos_dir);
        resolve(&mut paths.downloads_dir);
        resolve(&mut paths.diagnostics_dir);
        resolve(&mut paths.selectors_file);
        resolve(&mut paths.uploaded_videos_log);
        if let Some(log_file) = paths.log_file.as_mut() {
            resolve(log_file);
        }
        if let Some(profile) = self.browser.user_data_dir.as_mut() {
            resolve(profile);
        }
    }

    async fn create_dirs(&self) -> Result<()> {
        for dir in [
            &self.paths.scripts_dir,
            &self.paths.videos_dir,
            &self.paths.downloads_dir,
            &self.paths.diagnostics_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Browser families in fallback order, without duplicates.
    pub fn browser_families(&self) -> Vec<BrowserFamily> {
        let mut families = vec![self.browser.primary_browser];
        if let Some(secondary) = self.browser.secondary_browser {
            if !families.contains(&secondary) {
                families.push(secondary);
            }
        }
        families
    }

    pub fn session_settings(&self) -> SessionSettings {
        let b = &self.browser;
        let poll_interval = Duration::from_millis(b.poll_interval_ms.max(10));
        SessionSettings {
            families: self.browser_families(),
            headless: b.headless_mode,
            debugger_port: b.debugger_port,
            profile_dir: b.user_data_dir.clone(),
            window_size: (b.window_width, b.window_height),
            timeouts: Timeouts {
                element_wait: Duration::from_secs(b.wait_timeout),
                page_load: Duration::from_secs(b.page_load_timeout),
                retry_count: b.retry_attempts,
            },
            timing: InteractionTiming {
                poll_interval,
                ..InteractionTiming::default()
            },
            navigation_backoff: Backoff::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.browser.wait_timeout, 20);
        assert_eq!(config.ai.response_timeout, 180);
        assert_eq!(
            config.browser_families(),
            vec![BrowserFamily::Chrome, BrowserFamily::Edge]
        );
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "browser": { "primary_browser": "edge", "secondary_browser": null,
                             "debugger_port": 9222, "headless_mode": true },
                "ai": { "provider": "grok", "validation": "strict" }
            }"#,
        )
        .unwrap();

        let settings = config.session_settings();
        assert_eq!(settings.families, vec![BrowserFamily::Edge]);
        assert_eq!(settings.debugger_port, Some(9222));
        assert!(settings.headless);
        assert_eq!(config.ai.url(), Some("https://grok.com/"));
        assert_eq!(config.ai.validation, ValidationPolicy::Strict);
    }

    #[test]
    fn test_duplicate_secondary_browser_is_reported() {
        let config = AppConfig::from_json(
            r#"{ "browser": { "primary_browser": "edge", "secondary_browser": "edge" } }"#,
        )
        .unwrap();
        assert_eq!(config.warnings().len(), 1);
        assert_eq!(config.browser_families(), vec![BrowserFamily::Edge]);
        assert!(AppConfig::default().warnings().is_empty());
    }

    #[test]
    fn test_command_provider_requires_command() {
        let err = AppConfig::from_json(r#"{ "ai": { "provider": "command" } }"#).unwrap_err();
        assert!(err.to_string().contains("ai.command"));
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let mut config = AppConfig::default();
        config.paths.log_file = Some(PathBuf::from("run.log"));
        config.resolve_paths(Path::new("/etc/autopilot"));
        assert_eq!(config.paths.scripts_dir, PathBuf::from("/etc/autopilot/scripts"));
        assert_eq!(
            config.paths.log_file,
            Some(PathBuf::from("/etc/autopilot/run.log"))
        );
    }
}
