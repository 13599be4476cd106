pub mod browser;
pub mod config;
pub mod download;
pub mod error;
pub mod flow;
pub mod generate;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod script;
pub mod selectors;
pub mod upload;

//  Re-export commonly used items
pub use browser::{
    BrowserFamily, BrowserLauncher, ChromeDriver, ChromeLauncher, Completion, Diagnostics,
    ElementLocator, ElementRef, InteractionExecutor, PageDriver, SessionHandle, SessionManager,
    SessionSettings, Target, WaitCondition,
};
pub use download::{DownloadBaseline, DownloadTracker, DownloadWatcher};
pub use error::{BrowserError, BrowserInitError, FlowError, InteractionError, Stage};
pub use flow::{FlowArtifact, FlowRunner, Step};
pub use script::{ScriptMetadata, ValidationError, ValidationPolicy};
pub use selectors::{Locator, LocatorKind, LocatorSet, RawSelectors, SelectorCatalog};
