use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{Completion, Diagnostics, InteractionExecutor, SessionHandle};
use crate::download::{DownloadBaseline, DownloadWatcher};
use crate::error::{BrowserError, FlowError, Stage};
use crate::flow::{FlowArtifact, FlowRunner, Step};
use crate::selectors::{CatalogError, ElementSpec, LocatorSet, RawSelectors, SelectorCatalog};

/// Which style, voice and export format to pick in the editor.
#[derive(Debug, Clone)]
pub struct VideoExportSettings {
    pub url: String,
    pub style: String,
    pub voice: String,
    pub resolution: String,
    pub frame_rate: String,
    pub downloads_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub try_it_timeout: Duration,
    pub editor_timeout: Duration,
    pub generation_timeout: Duration,
    pub download_timeout: Duration,
    pub download_poll: Duration,
}

impl VideoExportSettings {
    pub fn new(url: impl Into<String>, downloads_dir: PathBuf, videos_dir: PathBuf) -> Self {
        Self {
            url: url.into(),
            style: "default".into(),
            voice: "default".into(),
            resolution: "1080p".into(),
            frame_rate: "30fps".into(),
            downloads_dir,
            videos_dir,
            try_it_timeout: Duration::from_secs(30),
            editor_timeout: Duration::from_secs(90),
            generation_timeout: Duration::from_secs(300),
            download_timeout: Duration::from_secs(600),
            download_poll: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoSelectors {
    pub style: Arc<LocatorSet>,
    pub voice: Arc<LocatorSet>,
    pub script_input: Arc<LocatorSet>,
    pub generate: Arc<LocatorSet>,
    pub export_open: Arc<LocatorSet>,
    pub resolution_dropdown: Arc<LocatorSet>,
    pub resolution_option: Arc<LocatorSet>,
    pub frame_rate_dropdown: Arc<LocatorSet>,
    pub frame_rate_option: Arc<LocatorSet>,
    pub export_confirm: Arc<LocatorSet>,
    pub try_it: Option<Arc<LocatorSet>>,
    pub generation_complete: Option<Arc<LocatorSet>>,
    pub captions_menu: Option<Arc<LocatorSet>>,
    pub captions_choice: Option<Arc<LocatorSet>>,
}

impl VideoSelectors {
    /// Style, voice and format keys are chosen by the export settings.
    pub fn specs(settings: &VideoExportSettings) -> Vec<ElementSpec> {
        let style = format!("styles.{}", settings.style);
        let voice = format!("voices.{}", settings.voice);
        let resolution = format!("export_options.resolution.{}", settings.resolution);
        let frame_rate = format!("export_options.frame_rate.{}", settings.frame_rate);
        vec![
            ElementSpec::required("style", &[style.as_str()]),
            ElementSpec::required("voice", &[voice.as_str()]),
            ElementSpec::required("script_input", &["script_input_area"]),
            ElementSpec::required("generate", &["generate_button"]),
            ElementSpec::required("export_open", &["export_button"]),
            ElementSpec::required("resolution_dropdown", &["export_options.resolution_dropdown"]),
            ElementSpec::required("resolution_option", &[resolution.as_str()]),
            ElementSpec::required("frame_rate_dropdown", &["export_options.frame_rate_dropdown"]),
            ElementSpec::required("frame_rate_option", &[frame_rate.as_str()]),
            ElementSpec::required(
                "export_confirm",
                &["export_options.confirm_button", "export_confirm_button"],
            ),
            ElementSpec::optional("try_it", &["try_it_button"]),
            ElementSpec::optional("generation_complete", &["generation_complete_indicator"]),
            ElementSpec::optional("captions_menu", &["captions_menu_button"]),
            ElementSpec::optional("captions_choice", &["captions_choice_option"]),
        ]
    }

    pub fn resolve(
        raw: &RawSelectors,
        section: &str,
        settings: &VideoExportSettings,
    ) -> Result<Self, CatalogError> {
        let catalog = SelectorCatalog::resolve(raw, section, &Self::specs(settings))?;
        Ok(Self {
            style: catalog.require("style")?,
            voice: catalog.require("voice")?,
            script_input: catalog.require("script_input")?,
            generate: catalog.require("generate")?,
            export_open: catalog.require("export_open")?,
            resolution_dropdown: catalog.require("resolution_dropdown")?,
            resolution_option: catalog.require("resolution_option")?,
            frame_rate_dropdown: catalog.require("frame_rate_dropdown")?,
            frame_rate_option: catalog.require("frame_rate_option")?,
            export_confirm: catalog.require("export_confirm")?,
            try_it: catalog.get("try_it"),
            generation_complete: catalog.get("generation_complete"),
            captions_menu: catalog.get("captions_menu"),
            captions_choice: catalog.get("captions_choice"),
        })
    }
}

/// Drive the video editor from script text to a downloaded file.
#[derive(Debug, Clone)]
pub struct VideoExportFlow {
    settings: VideoExportSettings,
    selectors: VideoSelectors,
}

impl VideoExportFlow {
    pub fn new(settings: VideoExportSettings, selectors: VideoSelectors) -> Self {
        Self {
            settings,
            selectors,
        }
    }

    fn editor_steps(&self, script: &str, element_wait: Duration, retries: u32) -> Vec<Step> {
        let s = &self.selectors;
        let mut steps = Vec::new();

        if let Some(try_it) = &s.try_it {
            steps.push(Step::click(try_it.clone(), self.settings.try_it_timeout).optional());
        }
        steps.push(Step::await_visible(s.script_input.clone(), self.settings.editor_timeout));
        steps.push(Step::click(s.style.clone(), element_wait).with_retries(retries));
        steps.push(Step::click(s.voice.clone(), element_wait).with_retries(retries));
        steps.push(Step::type_text(s.script_input.clone(), script, element_wait).with_retries(retries));
        steps.push(Step::click(s.generate.clone(), element_wait).with_retries(retries));
        steps
    }

    fn export_steps(&self, element_wait: Duration, retries: u32) -> Vec<Step> {
        let s = &self.selectors;
        let mut steps = Vec::new();

        if let (Some(menu), Some(choice)) = (&s.captions_menu, &s.captions_choice) {
            steps.push(Step::click(menu.clone(), element_wait).optional().with_retries(1));
            steps.push(Step::click(choice.clone(), element_wait).optional().with_retries(1));
        }

        steps.push(Step::click(s.export_open.clone(), element_wait).with_retries(retries));
        steps.push(Step::click(s.resolution_dropdown.clone(), element_wait).with_retries(retries));
        steps.push(Step::click(s.resolution_option.clone(), element_wait).with_retries(retries));
        steps.push(Step::click(s.frame_rate_dropdown.clone(), element_wait).with_retries(retries));
        steps.push(Step::click(s.frame_rate_option.clone(), element_wait).with_retries(retries));
        steps
    }

    pub async fn run(
        &self,
        session: &SessionHandle,
        diagnostics: Diagnostics,
        script: &str,
    ) -> Result<FlowArtifact, FlowError> {
        let timeouts = session.timeouts();
        log::info!(
            "Starting video export (style: {}, voice: {}, {} @ {})",
            self.settings.style,
            self.settings.voice,
            self.settings.resolution,
            self.settings.frame_rate
        );

        session
            .navigate(&self.settings.url)
            .await
            .map_err(|e| FlowError::from_browser(Stage::Navigate, e))?;

        let executor = session
            .executor(diagnostics)
            .map_err(|e| FlowError::from_browser(Stage::Init, e))?;
        let runner = FlowRunner::new(&executor);

        runner
            .run(&self.editor_steps(script, timeouts.element_wait, timeouts.retry_count))
            .await?;

        // Generation is done once the indicator, or else the export button, shows up
        let done = self
            .selectors
            .generation_complete
            .as_deref()
            .unwrap_or(self.selectors.export_open.as_ref());
        executor
            .wait_for_completion(Completion::Indicator(done), self.settings.generation_timeout)
            .await
            .map_err(|e| FlowError::from_interaction(Stage::WaitForCompletion, e))?;

        runner
            .run(&self.export_steps(timeouts.element_wait, timeouts.retry_count))
            .await?;

        let downloads = &self.settings.downloads_dir;
        tokio::fs::create_dir_all(downloads)
            .await
            .map_err(|e| FlowError::from_browser(Stage::Download, e.into()))?;
        let baseline = DownloadBaseline::snapshot(downloads)
            .await
            .map_err(|e| FlowError::from_browser(Stage::Download, e.into()))?;
        log::debug!("Download baseline has {} file(s)", baseline.len());

        runner
            .run_step(
                &Step::click(self.selectors.export_confirm.clone(), timeouts.element_wait)
                    .with_retries(timeouts.retry_count),
            )
            .await?;

        let downloaded = self.await_download(&executor, session, baseline).await?;
        Ok(FlowArtifact::File(self.store(&downloaded).await))
    }

    async fn await_download(
        &self,
        executor: &InteractionExecutor,
        session: &SessionHandle,
        baseline: DownloadBaseline,
    ) -> Result<PathBuf, FlowError> {
        let watcher = DownloadWatcher::new(self.settings.download_poll)
            .with_cancellation(session.cancellation().clone());

        match watcher
            .wait_for_new_file(&self.settings.downloads_dir, baseline, self.settings.download_timeout)
            .await
        {
            Ok(Some(path)) => Ok(path),
            Ok(None) => {
                executor.capture("download_timeout").await;
                Err(FlowError::DownloadTimeout {
                    waited: self.settings.download_timeout,
                })
            }
            Err(BrowserError::Cancelled) => Err(FlowError::Cancelled {
                stage: Stage::Download,
            }),
            Err(e) => Err(FlowError::from_browser(Stage::Download, e)),
        }
    }

    /// Move the download into the videos directory; keep it in place if that fails.
    async fn store(&self, downloaded: &Path) -> PathBuf {
        let extension = downloaded
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_else(|| ".mp4".to_string());
        let target = self.settings.videos_dir.join(format!(
            "capcut_video_{}{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            extension
        ));

        match move_file(downloaded, &target).await {
            Ok(()) => {
                log::info!("Video saved to {}", target.display());
                target
            }
            Err(e) => {
                log::warn!(
                    "Could not move {} to {}: {}; keeping download in place",
                    downloaded.display(),
                    target.display(),
                    e
                );
                downloaded.to_path_buf()
            }
        }
    }
}

/// Rename, falling back to copy and delete across file systems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}
