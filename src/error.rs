use std::fmt;
use std::time::Duration;

use chromiumoxide::error::CdpError;
use thiserror::Error;

use crate::script::ValidationError;
use crate::upload::UploadError;

/// Driver-level failure reported by a [`PageDriver`](crate::browser::PageDriver)
/// or a [`BrowserLauncher`](crate::browser::BrowserLauncher).
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to connect to browser: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element reference is stale: {0}")]
    StaleElement(String),

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No page available")]
    NoPage,

    #[error("CDP error: {0}")]
    Cdp(CdpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl BrowserError {
    /// True when the browser is gone and nothing more can be done with this session.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, BrowserError::SessionLost(_))
    }

    /// True for errors that must abort a flow instead of being retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BrowserError::SessionLost(_) | BrowserError::Cancelled)
    }
}

impl From<CdpError> for BrowserError {
    fn from(err: CdpError) -> Self {
        let lost = matches!(
            err,
            CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
        );
        let message = err.to_string();
        if lost || looks_like_disconnect(&message) {
            BrowserError::SessionLost(message)
        } else {
            BrowserError::Cdp(err)
        }
    }
}

/// Heuristic over driver error text for crashed or disconnected browsers.
pub fn looks_like_disconnect(message: &str) -> bool {
    const MARKERS: [&str; 8] = [
        "oneshot canceled",
        "target crashed",
        "disconnected",
        "connection closed",
        "channel closed",
        "browser closed",
        "broken pipe",
        "no such window",
    ];
    let lower = message.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Every attach and launch attempt failed; fatal to the run.
#[derive(Error, Debug)]
#[error("browser initialization failed after {attempts} attempt(s): {last}")]
pub struct BrowserInitError {
    pub attempts: usize,
    #[source]
    pub last: BrowserError,
}

/// Outcome of a failed interaction primitive.
#[derive(Error, Debug)]
pub enum InteractionError {
    #[error("no candidate matched for '{element}'")]
    NotFound { element: String },

    #[error("'{element}' failed after {attempts} attempt(s): {last}")]
    Failed {
        element: String,
        attempts: u32,
        last: String,
    },

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("interaction cancelled")]
    Cancelled,
}

impl InteractionError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, InteractionError::SessionLost(_))
    }

    /// Session loss and cancellation abort the whole flow, whatever the step.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InteractionError::SessionLost(_) | InteractionError::Cancelled
        )
    }
}

impl From<BrowserError> for InteractionError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::SessionLost(reason) => InteractionError::SessionLost(reason),
            BrowserError::Cancelled => InteractionError::Cancelled,
            BrowserError::ElementNotFound(element) => InteractionError::NotFound { element },
            other => InteractionError::Failed {
                element: String::from("page"),
                attempts: 1,
                last: other.to_string(),
            },
        }
    }
}

/// Pipeline stage a terminal error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Navigate,
    Locate,
    Interact,
    WaitForCompletion,
    Download,
    Validate,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Navigate => "navigate",
            Stage::Locate => "locate",
            Stage::Interact => "interact",
            Stage::WaitForCompletion => "wait-for-completion",
            Stage::Download => "download",
            Stage::Validate => "validate",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Terminal error of a flow or pipeline run.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("[init] {0}")]
    Init(#[from] BrowserInitError),

    #[error("[{stage}] browser session lost: {reason}")]
    SessionLost { stage: Stage, reason: String },

    #[error("[{stage}] element '{element}' not found")]
    NotFound { stage: Stage, element: String },

    #[error("[{stage}] timed out after {waited:?} waiting for {what}")]
    Timeout {
        stage: Stage,
        what: String,
        waited: Duration,
    },

    #[error("[download] no finished file appeared within {waited:?}")]
    DownloadTimeout { waited: Duration },

    #[error("[validate] {0}")]
    Validation(#[from] ValidationError),

    #[error("[upload] {0}")]
    Upload(#[from] UploadError),

    #[error("[{stage}] cancelled")]
    Cancelled { stage: Stage },

    #[error("[{stage}] {message}")]
    Failed { stage: Stage, message: String },
}

impl FlowError {
    pub fn stage(&self) -> Stage {
        match self {
            FlowError::Init(_) => Stage::Init,
            FlowError::SessionLost { stage, .. }
            | FlowError::NotFound { stage, .. }
            | FlowError::Timeout { stage, .. }
            | FlowError::Cancelled { stage }
            | FlowError::Failed { stage, .. } => *stage,
            FlowError::DownloadTimeout { .. } => Stage::Download,
            FlowError::Validation(_) => Stage::Validate,
            FlowError::Upload(_) => Stage::Upload,
        }
    }

    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        FlowError::Failed {
            stage,
            message: message.into(),
        }
    }

    /// Attribute an interaction failure to the step's stage.
    pub fn from_interaction(stage: Stage, err: InteractionError) -> Self {
        match err {
            InteractionError::NotFound { element } => FlowError::NotFound {
                stage: Stage::Locate,
                element,
            },
            InteractionError::Failed {
                element,
                attempts,
                last,
            } => FlowError::Failed {
                stage,
                message: format!("'{}' failed after {} attempt(s): {}", element, attempts, last),
            },
            InteractionError::Timeout { what, waited } => FlowError::Timeout {
                stage,
                what,
                waited,
            },
            InteractionError::SessionLost(reason) => FlowError::SessionLost { stage, reason },
            InteractionError::Cancelled => FlowError::Cancelled { stage },
        }
    }

    /// Attribute a driver failure to a stage.
    pub fn from_browser(stage: Stage, err: BrowserError) -> Self {
        match err {
            BrowserError::SessionLost(reason) => FlowError::SessionLost { stage, reason },
            BrowserError::Cancelled => FlowError::Cancelled { stage },
            other => FlowError::failed(stage, other.to_string()),
        }
    }
}
