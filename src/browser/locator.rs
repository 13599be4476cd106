use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::browser::driver::{ElementRef, PageDriver, WaitCondition};
use crate::error::{BrowserError, Result};
use crate::selectors::LocatorSet;

/// Walks a [`LocatorSet`] in priority order and returns the first candidate
/// that satisfies the wait condition.
pub struct ElementLocator<'a> {
    driver: &'a dyn PageDriver,
    poll_interval: Duration,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> ElementLocator<'a> {
    pub fn new(driver: &'a dyn PageDriver, poll_interval: Duration) -> Self {
        Self {
            driver,
            poll_interval,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Give each candidate up to `wait` to appear before moving to the next one.
    ///
    /// `Ok(None)` means every candidate was exhausted. Session loss or
    /// cancellation stops the search at once and is returned as an error.
    pub async fn find(
        &self,
        set: &LocatorSet,
        wait: Duration,
        visibility_required: bool,
    ) -> Result<Option<ElementRef>> {
        let condition = if visibility_required {
            WaitCondition::Visible
        } else {
            WaitCondition::Present
        };

        for (index, locator) in set.locators().iter().enumerate() {
            let deadline = Instant::now() + wait;
            loop {
                self.check_cancelled()?;

                match self.driver.probe(locator, condition).await {
                    Ok(Some(element)) => {
                        log::debug!(
                            "'{}' matched candidate {}/{}: {}",
                            set.name(),
                            index + 1,
                            set.len(),
                            locator
                        );
                        return Ok(Some(element));
                    }
                    Ok(None) => {}
                    Err(e) if e.is_terminal() => {
                        log::error!("Lost browser while locating '{}': {}", set.name(), e);
                        return Err(e);
                    }
                    Err(e) => {
                        log::debug!("Probe of {} failed: {}", locator, e);
                    }
                }

                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }

            log::debug!(
                "'{}' candidate {}/{} timed out after {:?}: {}",
                set.name(),
                index + 1,
                set.len(),
                wait,
                locator
            );
        }

        log::warn!(
            "No candidate for '{}' matched ({} tried)",
            set.name(),
            set.len()
        );
        Ok(None)
    }

    /// Poll every candidate each round, in order, under one shared deadline.
    pub async fn find_any(
        &self,
        set: &LocatorSet,
        wait: Duration,
        visibility_required: bool,
    ) -> Result<Option<ElementRef>> {
        let condition = if visibility_required {
            WaitCondition::Visible
        } else {
            WaitCondition::Present
        };
        let deadline = Instant::now() + wait;

        loop {
            for locator in set.locators() {
                self.check_cancelled()?;
                match self.driver.probe(locator, condition).await {
                    Ok(Some(element)) => return Ok(Some(element)),
                    Ok(None) => {}
                    Err(e) if e.is_terminal() => return Err(e),
                    Err(e) => log::debug!("Probe of {} failed: {}", locator, e),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(BrowserError::Cancelled),
            _ => Ok(()),
        }
    }
}
