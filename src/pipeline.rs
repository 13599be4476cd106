//! End-to-end run: generate script, export video, publish.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{Diagnostics, SessionHandle, SessionManager};
use crate::config::{AiProvider, AppConfig};
use crate::error::{FlowError, Stage};
use crate::flow::chat::ChatSettings;
use crate::flow::{ChatFlow, ChatSelectors, VideoExportFlow, VideoExportSettings, VideoSelectors};
use crate::generate::{BrowserChatGenerator, CommandGenerator, TextGenerator};
use crate::retry::Backoff;
use crate::script::{save_script, ScriptMetadata};
use crate::selectors::RawSelectors;
use crate::upload::{upload_with_retry, UploadLedger, VideoMetadata, VideoSink};

const VIDEO_SECTION: &str = "capcut";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Full,
    ScriptOnly,
    VideoOnly { script: PathBuf },
    UploadOnly { video: PathBuf, script: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub script_path: Option<PathBuf>,
    pub metadata: Option<ScriptMetadata>,
    pub video_path: Option<PathBuf>,
    pub video_id: Option<String>,
}

pub struct Pipeline {
    config: AppConfig,
    sessions: SessionManager,
    selectors: RawSelectors,
    sink: Option<Arc<dyn VideoSink>>,
    upload_backoff: Backoff,
}

impl Pipeline {
    pub fn new(config: AppConfig, sessions: SessionManager, selectors: RawSelectors) -> Self {
        Self {
            config,
            sessions,
            selectors,
            sink: None,
            upload_backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(60)),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_upload_backoff(mut self, backoff: Backoff) -> Self {
        self.upload_backoff = backoff;
        self
    }

    /// Run the stages for `mode`. Any browser session opened on the way is released
    /// before returning, whatever the outcome.
    pub async fn run(&self, mode: &RunMode, prompt: Option<&str>) -> Result<PipelineReport, FlowError> {
        let mut session = None;
        let result = self.run_stages(mode, prompt, &mut session).await;

        if let Some(session) = session {
            self.sessions.release(&session).await;
        }
        if let Err(e) = &result {
            log::error!("Pipeline failed at stage '{}': {}", e.stage(), e);
        }
        result
    }

    async fn run_stages(
        &self,
        mode: &RunMode,
        prompt: Option<&str>,
        session: &mut Option<Arc<SessionHandle>>,
    ) -> Result<PipelineReport, FlowError> {
        let mut report = PipelineReport::default();

        let metadata = match mode {
            RunMode::Full | RunMode::ScriptOnly => {
                let prompt = prompt.unwrap_or(self.config.ai.prompt.as_str()).trim();
                if prompt.is_empty() {
                    return Err(FlowError::failed(Stage::Init, "no prompt configured"));
                }
                let text = self.generate_script(prompt, session).await?;
                let path = save_script(&self.config.paths.scripts_dir, &text)
                    .await
                    .map_err(|e| FlowError::failed(Stage::Validate, format!("{:#}", e)))?;
                report.script_path = Some(path);
                ScriptMetadata::parse(&text)
            }
            RunMode::VideoOnly { script } | RunMode::UploadOnly { script, .. } => {
                report.script_path = Some(script.clone());
                ScriptMetadata::from_file(script)
                    .await
                    .map_err(|e| FlowError::failed(Stage::Validate, format!("{:#}", e)))?
            }
        };
        report.metadata = Some(metadata.clone());

        if *mode == RunMode::ScriptOnly {
            return Ok(report);
        }

        let video = match mode {
            RunMode::UploadOnly { video, .. } => video.clone(),
            _ => {
                let script = metadata.script.as_deref().ok_or_else(|| {
                    FlowError::failed(Stage::Validate, "script has no SCRIPT: section")
                })?;
                self.export_video(script, session).await?
            }
        };
        report.video_path = Some(video.clone());

        match &self.sink {
            Some(sink) => {
                report.video_id = Some(self.publish(sink.as_ref(), &video, &metadata).await?);
            }
            None => log::info!("No uploader configured; skipping upload"),
        }
        Ok(report)
    }

    async fn session(
        &self,
        slot: &mut Option<Arc<SessionHandle>>,
    ) -> Result<Arc<SessionHandle>, FlowError> {
        if let Some(session) = slot.as_ref() {
            if session.is_alive().await {
                return Ok(session.clone());
            }
            log::warn!("Browser session {} is no longer alive, starting a new one", session.id());
            self.sessions.release(session).await;
        }

        let session = Arc::new(self.sessions.acquire(&self.config.session_settings()).await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    fn diagnostics(&self, label: &str) -> Diagnostics {
        if self.config.browser.screenshot_on_error {
            Diagnostics::new(label, &self.config.paths.diagnostics_dir)
        } else {
            Diagnostics::disabled(label)
        }
    }

    async fn generate_script(
        &self,
        prompt: &str,
        slot: &mut Option<Arc<SessionHandle>>,
    ) -> Result<String, FlowError> {
        let ai = &self.config.ai;
        let generator: Box<dyn TextGenerator> = match (ai.provider, ai.provider.section(), ai.url()) {
            (AiProvider::Command, _, _) | (_, None, _) | (_, _, None) => {
                let command = ai.command.as_ref().ok_or_else(|| {
                    FlowError::failed(Stage::Init, "no generator command configured")
                })?;
                Box::new(
                    CommandGenerator::new(&command.program, command.args.clone())
                        .with_timeout(Duration::from_secs(ai.response_timeout))
                        .with_validation(ai.validation),
                )
            }
            (_, Some(section), Some(url)) => {
                let selectors = ChatSelectors::resolve(&self.selectors, section)
                    .map_err(|e| FlowError::failed(Stage::Init, e.to_string()))?;
                let mut settings = ChatSettings::new(url);
                settings.response_timeout = Duration::from_secs(ai.response_timeout);
                settings.validation = ai.validation;
                let flow = ChatFlow::new(section, settings, selectors);
                let session = self.session(slot).await?;
                Box::new(BrowserChatGenerator::new(flow, session, self.diagnostics(section)))
            }
        };

        generator.generate(prompt).await
    }

    async fn export_video(
        &self,
        script: &str,
        slot: &mut Option<Arc<SessionHandle>>,
    ) -> Result<PathBuf, FlowError> {
        let video = &self.config.video;
        let mut settings = VideoExportSettings::new(
            video.url.clone(),
            self.config.paths.downloads_dir.clone(),
            self.config.paths.videos_dir.clone(),
        );
        settings.style = video.style.clone();
        settings.voice = video.voice.clone();
        settings.resolution = video.resolution.clone();
        settings.frame_rate = video.frame_rate.clone();
        settings.generation_timeout = Duration::from_secs(video.generation_timeout);
        settings.download_timeout = Duration::from_secs(video.download_timeout);

        let selectors = VideoSelectors::resolve(&self.selectors, VIDEO_SECTION, &settings)
            .map_err(|e| FlowError::failed(Stage::Init, e.to_string()))?;
        let flow = VideoExportFlow::new(settings, selectors);

        let session = self.session(slot).await?;
        let artifact = flow
            .run(&session, self.diagnostics("video"), script)
            .await?;
        artifact
            .into_path()
            .ok_or_else(|| FlowError::failed(Stage::Download, "video flow produced no file"))
    }

    async fn publish(
        &self,
        sink: &dyn VideoSink,
        video: &std::path::Path,
        metadata: &ScriptMetadata,
    ) -> Result<String, FlowError> {
        let upload = &self.config.upload;
        let video_metadata = VideoMetadata::from_script(
            metadata,
            &upload.category_id,
            &upload.privacy_status,
            upload.notify_subscribers,
        )?;

        let video_id = upload_with_retry(
            sink,
            video,
            &video_metadata,
            upload.retry_attempts,
            self.upload_backoff,
        )
        .await?;

        let ledger = UploadLedger::new(&self.config.paths.uploaded_videos_log);
        if let Err(e) = ledger.record(&video_id, &video_metadata.title, video).await {
            log::warn!("Could not record upload in ledger: {:#}", e);
        }
        Ok(video_id)
    }
}
