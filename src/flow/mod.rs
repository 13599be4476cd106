//! Site workflows expressed as ordered interaction steps.

pub mod chat;
pub mod video;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{InteractionExecutor, Target};
use crate::error::{FlowError, InteractionError, Stage};
use crate::selectors::LocatorSet;

pub use chat::{ChatFlow, ChatSelectors};
pub use video::{VideoExportFlow, VideoExportSettings, VideoSelectors};

/// Output of one successful flow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowArtifact {
    Text(String),
    File(PathBuf),
}

impl FlowArtifact {
    pub fn into_text(self) -> Option<String> {
        match self {
            FlowArtifact::Text(text) => Some(text),
            FlowArtifact::File(_) => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            FlowArtifact::File(path) => Some(path),
            FlowArtifact::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Mandatory,
    /// Failures are logged and the flow moves on.
    Optional,
}

#[derive(Debug, Clone)]
pub enum Action {
    Click(Arc<LocatorSet>),
    TypeText {
        target: Arc<LocatorSet>,
        text: String,
        clear_first: bool,
    },
    AwaitVisible(Arc<LocatorSet>),
    AwaitGone(Arc<LocatorSet>),
    Pause(Duration),
}

impl Action {
    fn stage(&self) -> Stage {
        match self {
            Action::Click(_) | Action::TypeText { .. } | Action::Pause(_) => Stage::Interact,
            Action::AwaitVisible(_) => Stage::Locate,
            Action::AwaitGone(_) => Stage::WaitForCompletion,
        }
    }

    fn describe(&self) -> String {
        match self {
            Action::Click(set) => format!("click '{}'", set.name()),
            Action::TypeText { target, text, .. } => {
                format!("type {} chars into '{}'", text.chars().count(), target.name())
            }
            Action::AwaitVisible(set) => format!("wait for '{}'", set.name()),
            Action::AwaitGone(set) => format!("wait for '{}' to disappear", set.name()),
            Action::Pause(duration) => format!("pause {:?}", duration),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    pub action: Action,
    pub requirement: Requirement,
    pub timeout: Duration,
    pub retries: u32,
}

impl Step {
    pub fn new(action: Action, timeout: Duration) -> Self {
        Self {
            action,
            requirement: Requirement::Mandatory,
            timeout,
            retries: 3,
        }
    }

    pub fn click(target: Arc<LocatorSet>, timeout: Duration) -> Self {
        Self::new(Action::Click(target), timeout)
    }

    pub fn type_text(target: Arc<LocatorSet>, text: impl Into<String>, timeout: Duration) -> Self {
        Self::new(
            Action::TypeText {
                target,
                text: text.into(),
                clear_first: true,
            },
            timeout,
        )
    }

    pub fn await_visible(target: Arc<LocatorSet>, timeout: Duration) -> Self {
        Self::new(Action::AwaitVisible(target), timeout)
    }

    pub fn await_gone(target: Arc<LocatorSet>, timeout: Duration) -> Self {
        Self::new(Action::AwaitGone(target), timeout)
    }

    pub fn pause(duration: Duration) -> Self {
        Self::new(Action::Pause(duration), duration)
    }

    pub fn optional(mut self) -> Self {
        self.requirement = Requirement::Optional;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped,
}

/// Executes steps in order with the mandatory/optional failure policy.
pub struct FlowRunner<'a> {
    executor: &'a InteractionExecutor,
}

impl<'a> FlowRunner<'a> {
    pub fn new(executor: &'a InteractionExecutor) -> Self {
        Self { executor }
    }

    pub async fn run(&self, steps: &[Step]) -> Result<(), FlowError> {
        for (index, step) in steps.iter().enumerate() {
            log::info!(
                "[{}] step {}/{}: {}",
                self.executor.diagnostics().label(),
                index + 1,
                steps.len(),
                step.action.describe()
            );
            self.run_step(step).await?;
        }
        Ok(())
    }

    /// Session loss aborts regardless of requirement; other failures only abort mandatory steps.
    pub async fn run_step(&self, step: &Step) -> Result<StepOutcome, FlowError> {
        match self.execute(step).await {
            Ok(()) => Ok(StepOutcome::Done),
            Err(e) if e.is_terminal() => Err(FlowError::from_interaction(step.action.stage(), e)),
            Err(e) if step.requirement == Requirement::Optional => {
                log::info!("Optional step '{}' skipped: {}", step.action.describe(), e);
                Ok(StepOutcome::Skipped)
            }
            Err(e) => Err(FlowError::from_interaction(step.action.stage(), e)),
        }
    }

    async fn execute(&self, step: &Step) -> Result<(), InteractionError> {
        let executor = self.executor;
        match &step.action {
            Action::Click(set) => {
                executor
                    .click(Target::Locators(set), step.timeout, step.retries)
                    .await
            }
            Action::TypeText {
                target,
                text,
                clear_first,
            } => {
                executor
                    .type_text(
                        Target::Locators(target),
                        text,
                        *clear_first,
                        step.timeout,
                        step.retries,
                    )
                    .await
            }
            Action::AwaitVisible(set) => executor
                .wait_for_visible(set, step.timeout)
                .await
                .map(|_| ()),
            Action::AwaitGone(set) => executor.wait_for_disappearance(set, step.timeout).await,
            Action::Pause(duration) => executor.pause(*duration).await,
        }
    }
}
