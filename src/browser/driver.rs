use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BrowserError, Result};
use crate::selectors::Locator;

/// Condition an element must meet before a probe reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Present,
    Visible,
}

/// Handle to an element resolved by a probe.
///
/// The reference can go stale when the page replaces the node; operations on
/// a stale reference fail with [`BrowserError::StaleElement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub id: String,
    pub locator: Locator,
}

/// Browser families a session can be started with, in the order of preference
/// given by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Chrome,
    Edge,
}

impl fmt::Display for BrowserFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserFamily::Chrome => f.write_str("chrome"),
            BrowserFamily::Edge => f.write_str("edge"),
        }
    }
}

impl FromStr for BrowserFamily {
    type Err = BrowserError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(BrowserFamily::Chrome),
            "edge" | "msedge" => Ok(BrowserFamily::Edge),
            other => Err(BrowserError::Other(format!(
                "unsupported browser family '{}'",
                other
            ))),
        }
    }
}

/// Options for starting a fresh browser process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub family: BrowserFamily,
    pub headless: bool,
    pub profile_dir: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub executable: Option<PathBuf>,
}

/// Page-level operations the automation engine needs from a live session.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Start loading `url`. Does not wait for the document to finish.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Whether the current document reports `readyState == "complete"`.
    async fn is_document_ready(&self) -> Result<bool>;

    async fn current_url(&self) -> Result<String>;

    /// Single, non-waiting check for an element matching `locator`.
    async fn probe(&self, locator: &Locator, condition: WaitCondition)
        -> Result<Option<ElementRef>>;

    /// Present, visible and enabled.
    async fn is_clickable(&self, element: &ElementRef) -> Result<bool>;

    async fn click(&self, element: &ElementRef) -> Result<()>;

    /// Focus, select all, and delete the existing content.
    async fn clear(&self, element: &ElementRef) -> Result<()>;

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<()>;

    async fn text(&self, element: &ElementRef) -> Result<String>;

    /// PNG screenshot of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn is_alive(&self) -> bool;

    /// Terminate the browser process owned by this driver.
    async fn quit(&self) -> Result<()>;

    /// Drop the connection without touching the browser process.
    async fn detach(&self) -> Result<()>;
}

/// Produces drivers, either by attaching to a running browser or launching one.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn attach(&self, port: u16) -> Result<Arc<dyn PageDriver>>;

    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn PageDriver>>;
}
