use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::browser::{Diagnostics, SessionHandle};
use crate::error::{FlowError, Stage};
use crate::flow::ChatFlow;
use crate::script::{validate_response, ValidationPolicy};

/// Produces script text for a prompt, or fails.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, FlowError>;
}

/// Runs the chat flow on a shared browser session.
pub struct BrowserChatGenerator {
    flow: ChatFlow,
    session: Arc<SessionHandle>,
    diagnostics: Diagnostics,
}

impl BrowserChatGenerator {
    pub fn new(flow: ChatFlow, session: Arc<SessionHandle>, diagnostics: Diagnostics) -> Self {
        Self {
            flow,
            session,
            diagnostics,
        }
    }
}

#[async_trait]
impl TextGenerator for BrowserChatGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, FlowError> {
        let artifact = self
            .flow
            .run(&self.session, self.diagnostics.clone(), prompt)
            .await?;
        artifact.into_text().ok_or_else(|| {
            FlowError::failed(Stage::Locate, "chat flow produced a file instead of text")
        })
    }
}

/// Pipes the prompt to an external program and reads the answer from stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    validation: ValidationPolicy,
}

impl CommandGenerator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(300),
            validation: ValidationPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    async fn call(&self, prompt: &str) -> anyhow::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt")?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.program.display(), self.timeout))?
            .context("Failed to wait for generator")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed: {}", self.program.display(), stderr.trim());
        }

        Ok(clean_response(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl TextGenerator for CommandGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, FlowError> {
        let text = self
            .call(prompt)
            .await
            .map_err(|e| FlowError::failed(Stage::WaitForCompletion, format!("{:#}", e)))?;
        validate_response(&text, self.validation)?;
        Ok(text)
    }
}

/// Strip a surrounding markdown code fence, if any.
fn clean_response(response: &str) -> String {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag on the fence line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_response() {
        assert_eq!(clean_response("```text\nTITLE: x\n```"), "TITLE: x");
        assert_eq!(clean_response("  TITLE: x \n"), "TITLE: x");
        assert_eq!(clean_response("```unterminated"), "```unterminated");
    }
}
