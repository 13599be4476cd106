//! Chat and video flows end to end on the in-memory driver


use autopilot_webdriver::browser::{SessionSettings, Timeouts};
use autopilot_webdriver::flow::chat::ChatSettings;
use autopilot_webdriver::flow::{ChatFlow, ChatSelectors, VideoExportFlow, VideoExportSettings, VideoSelectors};
use autopilot_webdriver::retry::Backoff;
use autopilot_webdriver::{
    Diagnostics, FlowArtifact, FlowError, FlowRunner, LocatorSet, RawSelectors, SessionHandle,
    SessionManager, Stage, Step,
};
use fake_driver::{fast_timing, FakeDriver, FakeElement, FixedLauncher};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SCRIPT_RESPONSE: &str = "TITLE: Why the tide turns\n\
SCRIPT: Twice a day the sea walks away from the shore.\n\
DESCRIPTION: A one minute explainer on tides.\n\
KEYWORDS: tides, moon, ocean";

async fn session_on(driver: &Arc<FakeDriver>) -> SessionHandle {
    let settings = SessionSettings {
        timeouts: Timeouts {
            element_wait: Duration::from_millis(60),
            page_load: Duration::from_millis(60),
            retry_count: 2,
        },
        timing: fast_timing(),
        navigation_backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
        ..SessionSettings::default()
    };
    SessionManager::new(Arc::new(FixedLauncher(driver.clone())))
        .acquire(&settings)
        .await
        .expect("acquire")
}

fn chat_selectors() -> ChatSelectors {
    let raw = RawSelectors::from_value(json!({
        "chatgpt": {
            "prompt_textarea": ["#prompt-textarea", "//textarea"],
            "submit_button": "button[data-testid='send-button']",
            "response_area_last": "(//div[contains(@class,'markdown')])[last()]",
            "cookie_accept_button": "#cookie-accept"
        }
    }));
    ChatSelectors::resolve(&raw, "chatgpt").expect("chat selectors")
}

fn chat_flow() -> ChatFlow {
    let mut settings = ChatSettings::new("chat.example.com");
    settings.response_timeout = Duration::from_secs(2);
    settings.overlay_timeout = Duration::from_millis(10);
    settings.settle = Duration::from_millis(1);
    ChatFlow::new("chatgpt", settings, chat_selectors())
}

fn chat_page(response: &[&str]) -> FakeDriver {
    FakeDriver::new()
        .with_element("#prompt-textarea", FakeElement::new())
        .with_element("button[data-testid='send-button']", FakeElement::new())
        .with_element(
            "(//div[contains(@class,'markdown')])[last()]",
            FakeElement::new().with_texts(response),
        )
}

#[tokio::test]
async fn test_chat_flow_returns_stabilized_response() -> anyhow::Result<()> {
    let driver = Arc::new(chat_page(&["TITLE: Why", SCRIPT_RESPONSE]));
    let session = session_on(&driver).await;

    let artifact = chat_flow()
        .run(&session, Diagnostics::disabled("chatgpt"), "Write a short script about tides")
        .await?;

    assert_eq!(artifact, FlowArtifact::Text(SCRIPT_RESPONSE.to_string()));
    {
        let state = driver.state();
        assert_eq!(state.navigations, vec!["https://chat.example.com".to_string()]);
        assert_eq!(
            state.typed,
            vec![(
                "#prompt-textarea".to_string(),
                "Write a short script about tides".to_string()
            )]
        );
        assert_eq!(state.clicks, vec!["button[data-testid='send-button']".to_string()]);
    }
    session.release().await;
    println!("✅ Chat flow produced {} chars", SCRIPT_RESPONSE.len());
    Ok(())
}

#[tokio::test]
async fn test_chat_flow_rejects_response_without_markers() {
    let driver = Arc::new(chat_page(&["Sure! Here is a lovely story about the sea."]));
    let session = session_on(&driver).await;

    let err = chat_flow()
        .run(&session, Diagnostics::disabled("chatgpt"), "tides")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Validation(_)));
    assert_eq!(err.stage(), Stage::Validate);
}

#[tokio::test]
async fn test_chat_flow_missing_prompt_fails_at_locate() {
    let driver = Arc::new(
        FakeDriver::new().with_element("button[data-testid='send-button']", FakeElement::new()),
    );
    let session = session_on(&driver).await;

    let err = chat_flow()
        .run(&session, Diagnostics::disabled("chatgpt"), "tides")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::NotFound { ref element, .. } if element == "prompt"));
    assert_eq!(err.stage(), Stage::Locate);
    assert!(driver.clicks().is_empty());
}

#[tokio::test]
async fn test_chat_flow_session_loss_is_terminal() {
    let driver = Arc::new(
        chat_page(&[SCRIPT_RESPONSE]).with_element(
            "button[data-testid='send-button']",
            FakeElement::new().crashing_on_click(),
        ),
    );
    let session = session_on(&driver).await;

    let err = chat_flow()
        .run(&session, Diagnostics::disabled("chatgpt"), "tides")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::SessionLost { stage: Stage::Interact, .. }));
    assert_eq!(driver.state().text_reads, 0);
}

#[tokio::test]
async fn test_runner_skips_failed_optional_steps() -> anyhow::Result<()> {
    let driver = Arc::new(FakeDriver::new().with_element("#go", FakeElement::new()));
    let session = session_on(&driver).await;
    let executor = session.executor(Diagnostics::disabled("runner"))?;

    let popup = Arc::new(LocatorSet::from_strings("popup_close", &["#popup"]));
    let go = Arc::new(LocatorSet::from_strings("go", &["#go"]));
    let steps = vec![
        Step::click(popup.clone(), Duration::from_millis(10)).optional().with_retries(1),
        Step::click(go.clone(), Duration::from_millis(30)),
    ];

    FlowRunner::new(&executor).run(&steps).await?;
    assert_eq!(driver.clicks(), vec!["#go".to_string()]);

    let err = FlowRunner::new(&executor)
        .run(&[Step::click(popup, Duration::from_millis(10)).with_retries(1)])
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Locate);
    Ok(())
}

#[tokio::test]
async fn test_runner_aborts_on_session_loss_in_optional_step() -> anyhow::Result<()> {
    let driver = Arc::new(FakeDriver::new().with_element("#go", FakeElement::new()));
    let session = session_on(&driver).await;
    let executor = session.executor(Diagnostics::disabled("runner"))?;
    driver.crash();

    let go = Arc::new(LocatorSet::from_strings("go", &["#go"]));
    let err = FlowRunner::new(&executor)
        .run(&[Step::click(go, Duration::from_millis(30)).optional()])
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::SessionLost { .. }));
    Ok(())
}

fn editor_page() -> FakeDriver {
    editor_page_without(&[])
}

fn editor_page_without(missing: &[&str]) -> FakeDriver {
    [
        "#style-anime",
        "#voice-narrator",
        "textarea.script",
        "#generate",
        "#export",
        "#resolution",
        "//li[text()='1080p']",
        "#fps",
        "//li[text()='30fps']",
        "#confirm",
    ]
    .into_iter()
    .filter(|locator| !missing.contains(locator))
    .fold(FakeDriver::new(), |driver, locator| {
        driver.with_element(locator, FakeElement::new())
    })
}

#[tokio::test]
async fn test_video_flow_moves_download_into_videos_dir() -> anyhow::Result<()> {
    let downloads = tempfile::tempdir()?;
    let videos = tempfile::tempdir()?;
    tokio::fs::write(downloads.path().join("older.mp4"), b"not ours").await?;

    let mut settings = VideoExportSettings::new(
        "https://editor.example/magic",
        downloads.path().to_path_buf(),
        videos.path().to_path_buf(),
    );
    settings.style = "anime".into();
    settings.voice = "narrator".into();
    settings.editor_timeout = Duration::from_millis(60);
    settings.generation_timeout = Duration::from_millis(60);
    settings.download_timeout = Duration::from_secs(5);
    settings.download_poll = Duration::from_millis(20);

    let raw = RawSelectors::from_value(json!({
        "capcut": {
            "styles": { "anime": "#style-anime" },
            "voices": { "narrator": "#voice-narrator" },
            "script_input_area": "textarea.script",
            "generate_button": "#generate",
            "export_button": "#export",
            "export_options": {
                "resolution_dropdown": "#resolution",
                "resolution": { "1080p": "//li[text()='1080p']" },
                "frame_rate_dropdown": "#fps",
                "frame_rate": { "30fps": "//li[text()='30fps']" },
                "confirm_button": "#confirm"
            }
        }
    }));
    let selectors = VideoSelectors::resolve(&raw, "capcut", &settings)?;

    let driver = Arc::new(editor_page());
    let session = session_on(&driver).await;

    // The browser "downloads" once the export is confirmed
    let browser = driver.clone();
    let download_dir = downloads.path().to_path_buf();
    let downloader = tokio::spawn(async move {
        while !browser.clicks().iter().any(|c| c == "#confirm") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let partial = download_dir.join("export.mp4.crdownload");
        tokio::fs::write(&partial, vec![7u8; 4096]).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::fs::rename(&partial, download_dir.join("export.mp4")).await?;
        anyhow::Ok(())
    });

    let artifact = VideoExportFlow::new(settings, selectors)
        .run(&session, Diagnostics::disabled("capcut"), "Twice a day the sea walks away.")
        .await?;
    downloader.await??;

    let stored = artifact.into_path().expect("file artifact");
    assert_eq!(stored.parent(), Some(videos.path()));
    let name = stored.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    assert!(name.starts_with("capcut_video_") && name.ends_with(".mp4"));
    assert_eq!(tokio::fs::read(&stored).await?.len(), 4096);
    assert!(!downloads.path().join("export.mp4").exists());
    assert!(downloads.path().join("older.mp4").exists());

    let typed = driver.state().typed.clone();
    assert_eq!(typed[0].1, "Twice a day the sea walks away.");
    Ok(())
}

#[tokio::test]
async fn test_video_flow_download_timeout() -> anyhow::Result<()> {
    let downloads = tempfile::tempdir()?;
    let videos = tempfile::tempdir()?;
    let mut settings = VideoExportSettings::new(
        "https://editor.example/magic",
        downloads.path().to_path_buf(),
        videos.path().to_path_buf(),
    );
    settings.style = "anime".into();
    settings.voice = "narrator".into();
    settings.editor_timeout = Duration::from_millis(60);
    settings.generation_timeout = Duration::from_millis(60);
    settings.download_timeout = Duration::from_millis(80);
    settings.download_poll = Duration::from_millis(20);

    let raw = RawSelectors::from_value(json!({
        "capcut": {
            "styles": { "anime": "#style-anime" },
            "voices": { "narrator": "#voice-narrator" },
            "script_input_area": "textarea.script",
            "generate_button": "#generate",
            "export_button": "#export",
            "export_options": {
                "resolution_dropdown": "#resolution",
                "resolution": { "1080p": "//li[text()='1080p']" },
                "frame_rate_dropdown": "#fps",
                "frame_rate": { "30fps": "//li[text()='30fps']" }
            },
            "export_confirm_button": "#confirm"
        }
    }));
    let selectors = VideoSelectors::resolve(&raw, "capcut", &settings)?;
    let driver = Arc::new(editor_page());
    let session = session_on(&driver).await;

    let err = VideoExportFlow::new(settings, selectors)
        .run(&session, Diagnostics::disabled("capcut"), "script")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::DownloadTimeout { .. }));
    assert_eq!(err.stage(), Stage::Download);
    Ok(())
}

#[tokio::test]
async fn test_video_flow_generation_timeout_is_a_completion_failure() -> anyhow::Result<()> {
    let downloads = tempfile::tempdir()?;
    let videos = tempfile::tempdir()?;
    let mut settings = VideoExportSettings::new(
        "https://editor.example/magic",
        downloads.path().to_path_buf(),
        videos.path().to_path_buf(),
    );
    settings.style = "anime".into();
    settings.voice = "narrator".into();
    settings.editor_timeout = Duration::from_millis(60);
    settings.generation_timeout = Duration::from_millis(60);

    let raw = RawSelectors::from_value(json!({
        "capcut": {
            "styles": { "anime": "#style-anime" },
            "voices": { "narrator": "#voice-narrator" },
            "script_input_area": "textarea.script",
            "generate_button": "#generate",
            "export_button": "#export",
            "generation_complete_indicator": "#rendered",
            "export_options": {
                "resolution_dropdown": "#resolution",
                "resolution": { "1080p": "//li[text()='1080p']" },
                "frame_rate_dropdown": "#fps",
                "frame_rate": { "30fps": "//li[text()='30fps']" }
            },
            "export_confirm_button": "#confirm"
        }
    }));
    let selectors = VideoSelectors::resolve(&raw, "capcut", &settings)?;
    // The editor never renders, so neither "#rendered" nor "#export" appear
    let driver = Arc::new(editor_page_without(&["#export"]));
    let session = session_on(&driver).await;

    let err = VideoExportFlow::new(settings, selectors)
        .run(&session, Diagnostics::disabled("capcut"), "script")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Timeout { ref what, .. } if what == "generation_complete"));
    assert_eq!(err.stage(), Stage::WaitForCompletion);
    assert!(driver.clicks().iter().all(|c| c != "#export"));
    println!("✅ Generation timeout reported as {}", err.stage());
    Ok(())
}
