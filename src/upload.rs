//! Publishing seam: a [`VideoSink`] takes a finished file plus metadata and
//! returns the remote video id.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::retry::Backoff;
use crate::script::ScriptMetadata;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Exit status an uploader uses to signal a retryable failure (EX_TEMPFAIL).
pub const TEMPFAIL_EXIT_CODE: i32 = 75;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Server-side hiccup; safe to retry.
    #[error("transient upload failure: {0}")]
    Transient(String),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl UploadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
    pub notify_subscribers: bool,
}

impl VideoMetadata {
    /// Build upload metadata, truncating title and description to platform limits.
    pub fn from_script(
        meta: &ScriptMetadata,
        category_id: &str,
        privacy_status: &str,
        notify_subscribers: bool,
    ) -> Result<Self, UploadError> {
        let title = meta
            .title
            .as_deref()
            .ok_or_else(|| UploadError::Rejected("script has no title".into()))?;
        let description = meta
            .description
            .as_deref()
            .ok_or_else(|| UploadError::Rejected("script has no description".into()))?;
        if meta.tags.is_empty() {
            return Err(UploadError::Rejected("script has no keywords".into()));
        }

        Ok(Self {
            title: truncate_chars(title, MAX_TITLE_CHARS),
            description: truncate_chars(description, MAX_DESCRIPTION_CHARS),
            tags: meta.tags.clone(),
            category_id: category_id.to_string(),
            privacy_status: privacy_status.to_string(),
            notify_subscribers,
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
pub trait VideoSink: Send + Sync {
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String, UploadError>;
}

/// Upload, retrying only transient failures, at most `attempts` times in total.
pub async fn upload_with_retry(
    sink: &dyn VideoSink,
    video: &Path,
    metadata: &VideoMetadata,
    attempts: u32,
    backoff: Backoff,
) -> Result<String, UploadError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match sink.upload(video, metadata).await {
            Ok(video_id) => {
                log::info!("Uploaded {} as video id {}", video.display(), video_id);
                return Ok(video_id);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = backoff.delay(attempt);
                log::warn!(
                    "Upload attempt {}/{} failed ({}), retrying in {:?}",
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!("Upload of {} failed: {}", video.display(), e);
                return Err(e);
            }
        }
    }
}

/// Runs an external uploader: metadata JSON on stdin, video path as the last argument,
/// video id on stdout.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSink {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, video: &Path, metadata: &VideoMetadata) -> anyhow::Result<std::process::Output> {
        let payload = serde_json::to_vec(metadata).context("Failed to encode metadata")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(video)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn uploader {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .context("Failed to write metadata to uploader")?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .context("Uploader timed out")?
            .context("Failed to wait for uploader")
    }
}

#[async_trait]
impl VideoSink for CommandSink {
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String, UploadError> {
        let output = self
            .run(video, metadata)
            .await
            .map_err(|e| UploadError::Rejected(format!("{:#}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let transient = output.status.code() == Some(TEMPFAIL_EXIT_CODE)
                || mentions_retryable_status(&stderr);
            return Err(if transient {
                UploadError::Transient(stderr)
            } else {
                UploadError::Rejected(stderr)
            });
        }

        let video_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if video_id.is_empty() {
            return Err(UploadError::Rejected("uploader printed no video id".into()));
        }
        Ok(video_id)
    }
}

fn mentions_retryable_status(stderr: &str) -> bool {
    ["500", "502", "503", "504"]
        .iter()
        .any(|code| stderr.contains(&format!("HTTP {}", code)) || stderr.contains(&format!("status {}", code)))
}

/// One line per successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: String,
    pub video_id: String,
    pub title: String,
    pub file: PathBuf,
}

/// Append-only JSON-lines record of published videos.
#[derive(Debug, Clone)]
pub struct UploadLedger {
    path: PathBuf,
}

impl UploadLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn record(&self, video_id: &str, title: &str, file: &Path) -> anyhow::Result<()> {
        let entry = LedgerEntry {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            video_id: video_id.to_string(),
            title: title.to_string(),
            file: file.to_path_buf(),
        };
        let mut line = serde_json::to_string(&entry).context("Failed to encode ledger entry")?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create ledger dir {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open ledger {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append ledger entry")?;
        Ok(())
    }

    pub async fn entries(&self) -> anyhow::Result<Vec<LedgerEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read ledger {}", self.path.display()))
            }
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Corrupt ledger line"))
            .collect()
    }
}
