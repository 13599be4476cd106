//! Resilient single-step interactions: click, type, wait.
//!
//! Every primitive returns an [`InteractionError`] that keeps "not found"
//! separate from "session lost". Callers must not retry after the latter.
//! Failure paths take a best-effort diagnostic screenshot first.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::browser::driver::{ElementRef, PageDriver, WaitCondition};
use crate::browser::locator::ElementLocator;
use crate::error::{BrowserError, InteractionError};
use crate::retry::Backoff;
use crate::selectors::LocatorSet;

pub type InteractionResult<T> = std::result::Result<T, InteractionError>;

/// Consecutive identical non-empty reads that count as finished text.
pub const STABLE_READS: u32 = 3;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// What an interaction acts on: an already resolved element, or candidates to resolve.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Element(&'a ElementRef),
    Locators(&'a LocatorSet),
}

impl Target<'_> {
    fn name(&self) -> String {
        match self {
            Target::Element(element) => element.locator.to_string(),
            Target::Locators(set) => set.name().to_string(),
        }
    }
}

impl<'a> From<&'a LocatorSet> for Target<'a> {
    fn from(set: &'a LocatorSet) -> Self {
        Target::Locators(set)
    }
}

impl<'a> From<&'a ElementRef> for Target<'a> {
    fn from(element: &'a ElementRef) -> Self {
        Target::Element(element)
    }
}

/// How to decide that an asynchronous generation has finished.
#[derive(Debug, Clone, Copy)]
pub enum Completion<'a> {
    /// Wait for a "done" element to become visible.
    Indicator(&'a LocatorSet),
    /// Poll the text of an element until it stops changing.
    Stabilization(&'a LocatorSet),
}

impl<'a> Completion<'a> {
    /// Prefer an indicator when one is configured.
    pub fn select(indicator: Option<&'a LocatorSet>, target: &'a LocatorSet) -> Self {
        match indicator {
            Some(set) if !set.is_empty() => Completion::Indicator(set),
            _ => Completion::Stabilization(target),
        }
    }
}

/// Where failure screenshots go, and under which label.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    label: String,
    dir: Option<PathBuf>,
}

impl Diagnostics {
    pub fn new(label: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            dir: Some(dir.into()),
        }
    }

    pub fn disabled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            dir: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Write a screenshot named after `what`. Never fails; returns the path on success.
    pub async fn capture(&self, driver: &dyn PageDriver, what: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;

        let png = match tokio::time::timeout(SCREENSHOT_TIMEOUT, driver.screenshot()).await {
            Ok(Ok(png)) => png,
            Ok(Err(e)) => {
                log::warn!("Diagnostic screenshot for '{}' failed: {}", what, e);
                return None;
            }
            Err(_) => {
                log::warn!("Diagnostic screenshot for '{}' timed out", what);
                return None;
            }
        };

        let file_name = format!(
            "{}_{}_{}.png",
            sanitize(&self.label),
            sanitize(what),
            chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let path = dir.join(file_name);

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            log::warn!("Cannot create diagnostics dir {}: {}", dir.display(), e);
            return None;
        }
        match tokio::fs::write(&path, png).await {
            Ok(()) => {
                log::info!("Saved diagnostic screenshot {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Cannot write screenshot {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Polling and retry cadence for interactions.
#[derive(Debug, Clone, Copy)]
pub struct InteractionTiming {
    pub poll_interval: Duration,
    pub stabilization_interval: Duration,
    pub retry_backoff: Backoff,
}

impl Default for InteractionTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            stabilization_interval: Duration::from_secs(2),
            retry_backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(2)),
        }
    }
}

pub struct InteractionExecutor {
    driver: Arc<dyn PageDriver>,
    timing: InteractionTiming,
    cancel: CancellationToken,
    diagnostics: Diagnostics,
}

impl InteractionExecutor {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        timing: InteractionTiming,
        cancel: CancellationToken,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            driver,
            timing,
            cancel,
            diagnostics,
        }
    }

    pub fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn locator(&self) -> ElementLocator<'_> {
        ElementLocator::new(self.driver.as_ref(), self.timing.poll_interval)
            .with_cancellation(&self.cancel)
    }

    /// Click once the target is clickable, retrying non-fatal failures up to `retries` attempts.
    pub async fn click(
        &self,
        target: Target<'_>,
        timeout: Duration,
        retries: u32,
    ) -> InteractionResult<()> {
        let name = target.name();
        let attempts = retries.max(1);
        let mut resolved_once = false;
        let mut last = String::new();

        for attempt in 1..=attempts {
            let element = match self.resolve(target, timeout, false).await {
                Ok(element) => element,
                Err(e) if e.is_terminal() => return self.fail(&name, e).await,
                Err(e) => {
                    last = e.to_string();
                    self.retry_pause(&name, attempt, attempts).await?;
                    continue;
                }
            };
            resolved_once = true;

            match self.wait_until_clickable(&element, timeout).await {
                Ok(true) => {}
                Ok(false) => {
                    last = format!("not clickable within {:?}", timeout);
                    self.retry_pause(&name, attempt, attempts).await?;
                    continue;
                }
                Err(e) => return self.fail(&name, e.into()).await,
            }

            match self.driver.click(&element).await {
                Ok(()) => {
                    log::debug!("Clicked '{}' (attempt {}/{})", name, attempt, attempts);
                    return Ok(());
                }
                Err(e) if e.is_terminal() => return self.fail(&name, e.into()).await,
                Err(e) => {
                    log::warn!("Click on '{}' failed (attempt {}/{}): {}", name, attempt, attempts, e);
                    last = e.to_string();
                }
            }
            self.retry_pause(&name, attempt, attempts).await?;
        }

        let err = if resolved_once {
            InteractionError::Failed {
                element: name.clone(),
                attempts,
                last,
            }
        } else {
            InteractionError::NotFound {
                element: name.clone(),
            }
        };
        self.fail(&name, err).await
    }

    /// Type into the target, optionally clearing it first with select-all and delete.
    pub async fn type_text(
        &self,
        target: Target<'_>,
        text: &str,
        clear_first: bool,
        timeout: Duration,
        retries: u32,
    ) -> InteractionResult<()> {
        let name = target.name();
        let attempts = retries.max(1);
        let mut resolved_once = false;
        let mut last = String::new();

        for attempt in 1..=attempts {
            let element = match self.resolve(target, timeout, true).await {
                Ok(element) => element,
                Err(e) if e.is_terminal() => return self.fail(&name, e).await,
                Err(e) => {
                    last = e.to_string();
                    self.retry_pause(&name, attempt, attempts).await?;
                    continue;
                }
            };
            resolved_once = true;

            let outcome = async {
                if clear_first {
                    self.driver.clear(&element).await?;
                }
                self.driver.type_text(&element, text).await
            }
            .await;

            match outcome {
                Ok(()) => {
                    log::debug!("Typed {} chars into '{}'", text.chars().count(), name);
                    return Ok(());
                }
                Err(e) if e.is_terminal() => return self.fail(&name, e.into()).await,
                Err(e) => {
                    log::warn!("Typing into '{}' failed (attempt {}/{}): {}", name, attempt, attempts, e);
                    last = e.to_string();
                }
            }
            self.retry_pause(&name, attempt, attempts).await?;
        }

        let err = if resolved_once {
            InteractionError::Failed {
                element: name.clone(),
                attempts,
                last,
            }
        } else {
            InteractionError::NotFound {
                element: name.clone(),
            }
        };
        self.fail(&name, err).await
    }

    /// Wait for a candidate to become visible.
    pub async fn wait_for_visible(
        &self,
        set: &LocatorSet,
        timeout: Duration,
    ) -> InteractionResult<ElementRef> {
        match self.locator().find(set, timeout, true).await {
            Ok(Some(element)) => Ok(element),
            Ok(None) => {
                let err = InteractionError::NotFound {
                    element: set.name().to_string(),
                };
                self.fail(set.name(), err).await
            }
            Err(e) => self.fail(set.name(), e.into()).await,
        }
    }

    /// Block until generation is done. Stabilization yields the settled text.
    pub async fn wait_for_completion(
        &self,
        completion: Completion<'_>,
        timeout: Duration,
    ) -> InteractionResult<Option<String>> {
        match completion {
            Completion::Indicator(indicator) => {
                log::info!("Waiting up to {:?} for indicator '{}'", timeout, indicator.name());
                match self.locator().find_any(indicator, timeout, true).await {
                    Ok(Some(_)) => Ok(None),
                    Ok(None) => {
                        let err = InteractionError::Timeout {
                            what: indicator.name().to_string(),
                            waited: timeout,
                        };
                        self.fail(indicator.name(), err).await
                    }
                    Err(e) => self.fail(indicator.name(), e.into()).await,
                }
            }
            Completion::Stabilization(target) => {
                log::info!(
                    "Waiting up to {:?} for text of '{}' to stabilize",
                    timeout,
                    target.name()
                );
                match self.wait_for_stable_text(target, timeout).await {
                    Ok(text) => Ok(Some(text)),
                    Err(e) => self.fail(target.name(), e).await,
                }
            }
        }
    }

    async fn wait_for_stable_text(
        &self,
        target: &LocatorSet,
        timeout: Duration,
    ) -> InteractionResult<String> {
        let deadline = Instant::now() + timeout;
        let mut last = String::new();
        let mut identical_reads = 0u32;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let current = self.read_once(target).await?;

            if current.is_empty() {
                identical_reads = 0;
            } else if current == last {
                identical_reads += 1;
            } else {
                identical_reads = 1;
            }
            last = current;

            if identical_reads >= STABLE_READS {
                log::info!(
                    "Text of '{}' stable after {} polls ({} chars)",
                    target.name(),
                    polls,
                    last.chars().count()
                );
                return Ok(last);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(InteractionError::Timeout {
                    what: format!("text of '{}' to stabilize", target.name()),
                    waited: timeout,
                });
            }
            self.sleep(self.timing.stabilization_interval.min(deadline - now))
                .await?;
        }
    }

    /// One read of the target's text; a missing or stale element reads as empty.
    async fn read_once(&self, target: &LocatorSet) -> InteractionResult<String> {
        let element = match self.locator().find(target, Duration::ZERO, false).await {
            Ok(Some(element)) => element,
            Ok(None) => return Ok(String::new()),
            Err(e) => return Err(e.into()),
        };
        match self.driver.text(&element).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) if e.is_terminal() => Err(e.into()),
            Err(e) => {
                log::debug!("Reading '{}' failed: {}", target.name(), e);
                Ok(String::new())
            }
        }
    }

    /// Succeeds once no candidate is visible any more.
    pub async fn wait_for_disappearance(
        &self,
        set: &LocatorSet,
        timeout: Duration,
    ) -> InteractionResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut visible = false;
            for locator in set.locators() {
                self.check_cancelled()?;
                match self.driver.probe(locator, WaitCondition::Visible).await {
                    Ok(Some(_)) => {
                        visible = true;
                        break;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_terminal() => return self.fail(set.name(), e.into()).await,
                    Err(e) => log::debug!("Probe of {} failed: {}", locator, e),
                }
            }
            if !visible {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                let err = InteractionError::Timeout {
                    what: format!("'{}' to disappear", set.name()),
                    waited: timeout,
                };
                return self.fail(set.name(), err).await;
            }
            self.sleep(self.timing.poll_interval.min(deadline - now)).await?;
        }
    }

    /// Locate the target and return its trimmed inner text.
    pub async fn read_text(&self, set: &LocatorSet, timeout: Duration) -> InteractionResult<String> {
        let element = match self.locator().find(set, timeout, false).await {
            Ok(Some(element)) => element,
            Ok(None) => {
                let err = InteractionError::NotFound {
                    element: set.name().to_string(),
                };
                return self.fail(set.name(), err).await;
            }
            Err(e) => return self.fail(set.name(), e.into()).await,
        };

        match self.driver.text(&element).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => self.fail(set.name(), e.into()).await,
        }
    }

    /// Cancellable fixed pause between steps.
    pub async fn pause(&self, duration: Duration) -> InteractionResult<()> {
        self.sleep(duration).await
    }

    pub async fn capture(&self, what: &str) -> Option<PathBuf> {
        self.diagnostics.capture(self.driver.as_ref(), what).await
    }

    async fn resolve(
        &self,
        target: Target<'_>,
        timeout: Duration,
        visibility_required: bool,
    ) -> InteractionResult<ElementRef> {
        match target {
            Target::Element(element) => Ok(element.clone()),
            Target::Locators(set) => {
                match self.locator().find(set, timeout, visibility_required).await {
                    Ok(Some(element)) => Ok(element),
                    Ok(None) => Err(InteractionError::NotFound {
                        element: set.name().to_string(),
                    }),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn wait_until_clickable(
        &self,
        element: &ElementRef,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(BrowserError::Cancelled);
            }
            match self.driver.is_clickable(element).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => log::debug!("Clickability check on {} failed: {}", element.locator, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.timing.poll_interval.min(deadline - now)).await;
        }
    }

    async fn retry_pause(&self, name: &str, attempt: u32, attempts: u32) -> InteractionResult<()> {
        if attempt >= attempts {
            return Ok(());
        }
        let delay = self.timing.retry_backoff.delay(attempt);
        log::debug!("Retrying '{}' in {:?}", name, delay);
        self.sleep(delay).await
    }

    async fn sleep(&self, duration: Duration) -> InteractionResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(InteractionError::Cancelled),
        }
    }

    fn check_cancelled(&self) -> InteractionResult<()> {
        if self.cancel.is_cancelled() {
            Err(InteractionError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn fail<T>(&self, what: &str, err: InteractionError) -> InteractionResult<T> {
        if !matches!(err, InteractionError::Cancelled) {
            self.capture(what).await;
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_prefers_indicator() {
        let indicator = LocatorSet::from_strings("regenerate", &["button.regen"]);
        let target = LocatorSet::from_strings("response", &[".answer"]);

        assert!(matches!(
            Completion::select(Some(&indicator), &target),
            Completion::Indicator(set) if set.name() == "regenerate"
        ));
        assert!(matches!(
            Completion::select(None, &target),
            Completion::Stabilization(set) if set.name() == "response"
        ));

        let empty = LocatorSet::from_strings("regenerate", &[] as &[&str]);
        assert!(matches!(
            Completion::select(Some(&empty), &target),
            Completion::Stabilization(_)
        ));
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize("chat/send button"), "chat_send_button");
        assert_eq!(sanitize("video-1"), "video-1");
    }
}
