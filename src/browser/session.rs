use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::browser::driver::{BrowserFamily, BrowserLauncher, LaunchOptions, PageDriver};
use crate::browser::interaction::{Diagnostics, InteractionExecutor, InteractionTiming};
use crate::error::{BrowserError, BrowserInitError, Result};
use crate::retry::Backoff;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub element_wait: Duration,
    pub page_load: Duration,
    pub retry_count: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            element_wait: Duration::from_secs(20),
            page_load: Duration::from_secs(60),
            retry_count: 3,
        }
    }
}

/// Everything needed to start or attach one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Browser families in order of preference.
    pub families: Vec<BrowserFamily>,
    pub headless: bool,
    pub debugger_port: Option<u16>,
    pub profile_dir: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub timeouts: Timeouts,
    pub timing: InteractionTiming,
    pub navigation_backoff: Backoff,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            families: vec![BrowserFamily::Chrome],
            headless: false,
            debugger_port: None,
            profile_dir: None,
            window_size: (1920, 1080),
            timeouts: Timeouts::default(),
            timing: InteractionTiming::default(),
            navigation_backoff: Backoff::default(),
        }
    }
}

impl SessionSettings {
    fn launch_options(&self, family: BrowserFamily, profile_dir: Option<PathBuf>) -> LaunchOptions {
        LaunchOptions {
            family,
            headless: self.headless,
            profile_dir,
            window_size: self.window_size,
            executable: None,
        }
    }
}

/// Starts sessions, attaching to a debug port first and falling back to fresh launches.
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Sessions get child tokens of `cancel`; cancelling it stops every session's waits.
    pub fn with_cancellation(launcher: Arc<dyn BrowserLauncher>, cancel: CancellationToken) -> Self {
        Self { launcher, cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn acquire(
        &self,
        settings: &SessionSettings,
    ) -> std::result::Result<SessionHandle, BrowserInitError> {
        let mut attempts = 0usize;
        let mut last: Option<BrowserError> = None;

        if let Some(port) = settings.debugger_port {
            attempts += 1;
            log::info!("Attaching to browser on debug port {}", port);
            match self.launcher.attach(port).await {
                Ok(driver) => return Ok(self.handle(driver, true, None, settings)),
                Err(e) => {
                    log::warn!("Attach on port {} failed, launching instead: {}", port, e);
                    last = Some(e);
                }
            }
        }

        for &family in &settings.families {
            attempts += 1;
            let options = settings.launch_options(family, settings.profile_dir.clone());
            log::info!("Launching {} (attempt {})", family, attempts);
            match self.launcher.launch(&options).await {
                Ok(driver) => return Ok(self.handle(driver, false, Some(family), settings)),
                Err(e) => {
                    log::warn!("Launching {} failed: {}", family, e);
                    last = Some(e);
                }
            }

            if let Some(profile) = &settings.profile_dir {
                attempts += 1;
                log::info!(
                    "Retrying {} without profile directory {}",
                    family,
                    profile.display()
                );
                let options = settings.launch_options(family, None);
                match self.launcher.launch(&options).await {
                    Ok(driver) => return Ok(self.handle(driver, false, Some(family), settings)),
                    Err(e) => {
                        log::warn!("Launching {} without profile failed: {}", family, e);
                        last = Some(e);
                    }
                }
            }
        }

        let last = last.unwrap_or_else(|| {
            BrowserError::LaunchFailed("no browser family configured".to_string())
        });
        log::error!("Browser initialization failed after {} attempt(s): {}", attempts, last);
        Err(BrowserInitError { attempts, last })
    }

    pub async fn navigate(&self, handle: &SessionHandle, url: &str) -> Result<()> {
        handle.navigate(url).await
    }

    pub async fn release(&self, handle: &SessionHandle) {
        handle.release().await
    }

    fn handle(
        &self,
        driver: Arc<dyn PageDriver>,
        attached_externally: bool,
        family: Option<BrowserFamily>,
        settings: &SessionSettings,
    ) -> SessionHandle {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Session {} ready ({})",
            id,
            match family {
                Some(family) => format!("launched {}", family),
                None => "attached".to_string(),
            }
        );
        SessionHandle {
            id,
            driver: Mutex::new(Some(driver)),
            attached_externally,
            family,
            timeouts: settings.timeouts,
            timing: settings.timing,
            navigation_backoff: settings.navigation_backoff,
            cancel: self.cancel.child_token(),
        }
    }
}

/// One live automation session.
pub struct SessionHandle {
    id: u64,
    driver: Mutex<Option<Arc<dyn PageDriver>>>,
    attached_externally: bool,
    family: Option<BrowserFamily>,
    timeouts: Timeouts,
    timing: InteractionTiming,
    navigation_backoff: Backoff,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True when connected through a debug port; release then leaves the browser running.
    pub fn attached_externally(&self) -> bool {
        self.attached_externally
    }

    /// Family that was launched; `None` for attached sessions.
    pub fn family(&self) -> Option<BrowserFamily> {
        self.family
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn timing(&self) -> InteractionTiming {
        self.timing
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_released(&self) -> bool {
        self.slot().is_none()
    }

    pub fn driver(&self) -> Result<Arc<dyn PageDriver>> {
        self.slot()
            .ok_or_else(|| BrowserError::SessionLost(format!("session {} was released", self.id)))
    }

    pub fn executor(&self, diagnostics: Diagnostics) -> Result<InteractionExecutor> {
        Ok(InteractionExecutor::new(
            self.driver()?,
            self.timing,
            self.cancel.clone(),
            diagnostics,
        ))
    }

    pub async fn is_alive(&self) -> bool {
        match self.slot() {
            Some(driver) => driver.is_alive().await,
            None => false,
        }
    }

    /// Load `url` and wait for the document, retrying timeouts with capped doubling delays.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let driver = self.driver()?;
        let url = normalize_url(url);
        let attempts = self.timeouts.retry_count.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(BrowserError::Cancelled);
            }
            log::info!("Navigating to {} (attempt {}/{})", url, attempt, attempts);

            match driver.navigate(&url).await {
                Ok(()) => match self.wait_document_ready(driver.as_ref()).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => {
                        last = format!("page did not load within {:?}", self.timeouts.page_load);
                    }
                    Err(e) if e.is_terminal() => return Err(e),
                    Err(e) => last = e.to_string(),
                },
                Err(e) if e.is_terminal() => {
                    log::error!("Browser lost while navigating to {}: {}", url, e);
                    return Err(e);
                }
                Err(e) => last = e.to_string(),
            }
            log::warn!("Navigation attempt {}/{} failed: {}", attempt, attempts, last);

            if attempt < attempts {
                let delay = self.navigation_backoff.delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => return Err(BrowserError::Cancelled),
                }
            }
        }

        Err(BrowserError::NavigationFailed(format!(
            "{} after {} attempt(s): {}",
            url, attempts, last
        )))
    }

    async fn wait_document_ready(&self, driver: &dyn PageDriver) -> Result<bool> {
        let deadline = Instant::now() + self.timeouts.page_load;
        loop {
            if self.cancel.is_cancelled() {
                return Err(BrowserError::Cancelled);
            }
            match driver.is_document_ready().await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => log::debug!("readyState check failed: {}", e),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timing.poll_interval.min(deadline - now)) => {}
                _ = self.cancel.cancelled() => return Err(BrowserError::Cancelled),
            }
        }
    }

    /// Quit a launched browser, or only detach from an attached one. Safe to call twice.
    pub async fn release(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(driver) = driver else {
            log::debug!("Session {} already released", self.id);
            return;
        };

        if self.attached_externally {
            if let Err(e) = driver.detach().await {
                log::warn!("Detaching session {} failed: {}", self.id, e);
            }
            log::info!("Session {} detached; browser left running", self.id);
        } else {
            if let Err(e) = driver.quit().await {
                log::warn!("Closing browser for session {} failed: {}", self.id, e);
            }
            log::info!("Session {} closed", self.id);
        }
    }

    fn slot(&self) -> Option<Arc<dyn PageDriver>> {
        self.driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Add `https://` when no scheme is given.
pub fn normalize_url(url: &str) -> String {
    const SCHEMES: [&str; 5] = ["http://", "https://", "file://", "about:", "data:"];
    let url = url.trim();
    if SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("chat.openai.com"), "https://chat.openai.com");
        assert_eq!(normalize_url("http://localhost:80/x"), "http://localhost:80/x");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }

    #[test]
    fn test_default_settings_prefer_chrome() {
        let settings = SessionSettings::default();
        assert_eq!(settings.families, vec![BrowserFamily::Chrome]);
        assert_eq!(settings.timeouts.retry_count, 3);
    }
}
