pub mod chrome;
pub mod driver;
pub mod interaction;
pub mod locator;
pub mod session;

pub use chrome::{ChromeDriver, ChromeLauncher};
pub use driver::{
    BrowserFamily, BrowserLauncher, ElementRef, LaunchOptions, PageDriver, WaitCondition,
};
pub use interaction::{
    Completion, Diagnostics, InteractionExecutor, InteractionResult, InteractionTiming, Target,
};
pub use locator::ElementLocator;
pub use session::{SessionHandle, SessionManager, SessionSettings, Timeouts};
