use std::sync::Arc;
use std::time::Duration;

use crate::browser::{Completion, Diagnostics, SessionHandle};
use crate::error::{FlowError, Stage};
use crate::flow::{FlowArtifact, FlowRunner, Step};
use crate::script::{validate_response, ValidationPolicy};
use crate::selectors::{CatalogError, ElementSpec, LocatorSet, RawSelectors, SelectorCatalog};

/// Resolved selectors for a chat-style AI site.
#[derive(Debug, Clone)]
pub struct ChatSelectors {
    pub prompt: Arc<LocatorSet>,
    pub send: Arc<LocatorSet>,
    pub response: Arc<LocatorSet>,
    pub completion_indicator: Option<Arc<LocatorSet>>,
    pub login_popup_close: Option<Arc<LocatorSet>>,
    pub cookie_accept: Option<Arc<LocatorSet>>,
}

impl ChatSelectors {
    pub fn specs() -> Vec<ElementSpec> {
        vec![
            ElementSpec::required("prompt", &["prompt_input", "prompt_textarea"]),
            ElementSpec::required("send", &["send_button", "submit_button"]),
            ElementSpec::required("response", &["response_area_last", "response_output_last"]),
            ElementSpec::optional("completion_indicator", &["response_regenerate_button"]),
            ElementSpec::optional("login_popup_close", &["login_popup_close_button"]),
            ElementSpec::optional("cookie_accept", &["cookie_accept_button"]),
        ]
    }

    pub fn resolve(raw: &RawSelectors, section: &str) -> Result<Self, CatalogError> {
        let catalog = SelectorCatalog::resolve(raw, section, &Self::specs())?;
        Self::from_catalog(&catalog)
    }

    pub fn from_catalog(catalog: &SelectorCatalog) -> Result<Self, CatalogError> {
        Ok(Self {
            prompt: catalog.require("prompt")?,
            send: catalog.require("send")?,
            response: catalog.require("response")?,
            completion_indicator: catalog.get("completion_indicator"),
            login_popup_close: catalog.get("login_popup_close"),
            cookie_accept: catalog.get("cookie_accept"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub url: String,
    pub response_timeout: Duration,
    pub overlay_timeout: Duration,
    /// Pause after page load for client-side rendering.
    pub settle: Duration,
    pub validation: ValidationPolicy,
}

impl ChatSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            response_timeout: Duration::from_secs(180),
            overlay_timeout: Duration::from_secs(5),
            settle: Duration::from_secs(2),
            validation: ValidationPolicy::default(),
        }
    }
}

/// Submit a prompt to a chat site and return the validated response text.
#[derive(Debug, Clone)]
pub struct ChatFlow {
    site: String,
    settings: ChatSettings,
    selectors: ChatSelectors,
}

impl ChatFlow {
    pub fn new(site: impl Into<String>, settings: ChatSettings, selectors: ChatSelectors) -> Self {
        Self {
            site: site.into(),
            settings,
            selectors,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    fn steps(&self, prompt: &str, element_wait: Duration, retries: u32) -> Vec<Step> {
        let mut steps = vec![Step::pause(self.settings.settle)];

        for overlay in [&self.selectors.cookie_accept, &self.selectors.login_popup_close]
            .into_iter()
            .flatten()
        {
            steps.push(
                Step::click(overlay.clone(), self.settings.overlay_timeout)
                    .optional()
                    .with_retries(1),
            );
        }

        steps.push(
            Step::type_text(self.selectors.prompt.clone(), prompt, element_wait)
                .with_retries(retries),
        );
        steps.push(Step::click(self.selectors.send.clone(), element_wait).with_retries(retries));
        steps
    }

    pub async fn run(
        &self,
        session: &SessionHandle,
        diagnostics: Diagnostics,
        prompt: &str,
    ) -> Result<FlowArtifact, FlowError> {
        let timeouts = session.timeouts();
        log::info!("Starting {} chat flow", self.site);

        session
            .navigate(&self.settings.url)
            .await
            .map_err(|e| FlowError::from_browser(Stage::Navigate, e))?;

        let executor = session
            .executor(diagnostics)
            .map_err(|e| FlowError::from_browser(Stage::Init, e))?;

        FlowRunner::new(&executor)
            .run(&self.steps(prompt, timeouts.element_wait, timeouts.retry_count))
            .await?;

        let completion = Completion::select(
            self.selectors.completion_indicator.as_deref(),
            &self.selectors.response,
        );
        let settled = executor
            .wait_for_completion(completion, self.settings.response_timeout)
            .await
            .map_err(|e| FlowError::from_interaction(Stage::WaitForCompletion, e))?;

        let text = match settled {
            Some(text) => text,
            None => executor
                .read_text(&self.selectors.response, timeouts.element_wait)
                .await
                .map_err(|e| FlowError::from_interaction(Stage::Locate, e))?,
        };

        if text.is_empty() {
            executor.capture("empty_response").await;
            return Err(FlowError::failed(
                Stage::Locate,
                format!("{} response element was empty", self.site),
            ));
        }

        let report = validate_response(&text, self.settings.validation)?;
        log::info!(
            "{} response accepted ({} chars, {}/{} sections)",
            self.site,
            text.chars().count(),
            report.found.len(),
            report.found.len() + report.missing.len()
        );
        Ok(FlowArtifact::Text(text))
    }
}
