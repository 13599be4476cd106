use autopilot_webdriver::browser::{ChromeLauncher, SessionManager};
use autopilot_webdriver::config::AppConfig;
use autopilot_webdriver::pipeline::{Pipeline, RunMode};
use autopilot_webdriver::selectors::RawSelectors;
use autopilot_webdriver::upload::CommandSink;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Generate a script, export the video and upload it
    Full,
    /// Only generate and save a script
    Script,
    /// Export a video from an existing script file
    Video,
    /// Upload an existing video
    Upload,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Existing script file (video and upload modes)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Existing video file (upload mode)
    #[arg(long)]
    video: Option<PathBuf>,

    /// Prompt to send instead of the configured one
    #[arg(long)]
    topic: Option<String>,
}

impl Args {
    fn run_mode(&self) -> Result<RunMode, String> {
        let script = || {
            self.script
                .clone()
                .ok_or_else(|| "--script is required for this mode".to_string())
        };
        Ok(match self.mode {
            Mode::Full => RunMode::Full,
            Mode::Script => RunMode::ScriptOnly,
            Mode::Video => RunMode::VideoOnly { script: script()? },
            Mode::Upload => RunMode::UploadOnly {
                video: self
                    .video
                    .clone()
                    .ok_or_else(|| "--video is required for upload mode".to_string())?,
                script: script()?,
            },
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mode = match args.run_mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let config = match AppConfig::from_file(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = autopilot_webdriver::logging::init(config.paths.log_file.as_deref()) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(2);
    }
    log::info!("Starting autopilot ({:?} mode)", args.mode);
    for warning in config.warnings() {
        log::warn!("{}", warning);
    }

    let selectors = if config.paths.selectors_file.exists() {
        match RawSelectors::from_file(&config.paths.selectors_file).await {
            Ok(selectors) => selectors,
            Err(e) => {
                log::error!("{:#}", e);
                return ExitCode::from(2);
            }
        }
    } else {
        log::warn!(
            "Selectors file {} not found; browser flows will fail to resolve elements",
            config.paths.selectors_file.display()
        );
        RawSelectors::default()
    };

    // Ctrl-C cancels every wait in flight; the pipeline still releases its session
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let sessions = SessionManager::with_cancellation(Arc::new(ChromeLauncher), cancel);
    let sink = config
        .upload
        .command
        .as_ref()
        .map(|command| CommandSink::new(&command.program, command.args.clone()));

    let mut pipeline = Pipeline::new(config, sessions, selectors);
    if let Some(sink) = sink {
        pipeline = pipeline.with_sink(Arc::new(sink));
    }

    match pipeline.run(&mode, args.topic.as_deref()).await {
        Ok(report) => {
            if let Some(path) = &report.script_path {
                println!("script: {}", path.display());
            }
            if let Some(path) = &report.video_path {
                println!("video: {}", path.display());
            }
            if let Some(id) = &report.video_id {
                println!("video id: {}", id);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed at stage '{}': {}", e.stage(), e);
            ExitCode::FAILURE
        }
    }
}
