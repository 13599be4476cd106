//! Real Chrome against the local mock chat page
//!
//! These need a Chrome binary (or network access for the fetcher), so they are ignored
//! by default: `cargo test --test headless_chat_test -- --ignored`

mod test_server;

use autopilot_webdriver::browser::SessionSettings;
use autopilot_webdriver::flow::chat::ChatSettings;
use autopilot_webdriver::flow::{ChatFlow, ChatSelectors};
use autopilot_webdriver::{ChromeLauncher, Diagnostics, RawSelectors, SessionManager};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_server::TestServer;

fn headless() -> SessionSettings {
    SessionSettings {
        headless: true,
        ..SessionSettings::default()
    }
}

fn selectors(with_indicator: bool) -> ChatSelectors {
    let mut section = json!({
        "prompt_textarea": ["#prompt-textarea", "//textarea"],
        "send_button": "//button[@data-testid='send-button']",
        "response_area_last": "(//div[contains(@class,'markdown')])[last()]",
        "cookie_accept_button": "#cookie-accept",
        "login_popup_close_button": "#no-such-popup"
    });
    if with_indicator {
        section["response_regenerate_button"] = json!("#regenerate");
    }
    ChatSelectors::resolve(&RawSelectors::from_value(json!({ "mock": section })), "mock")
        .expect("selectors")
}

fn chat_settings(url: String) -> ChatSettings {
    let mut settings = ChatSettings::new(url);
    settings.response_timeout = Duration::from_secs(30);
    settings.overlay_timeout = Duration::from_secs(1);
    settings.settle = Duration::from_millis(200);
    settings
}

#[tokio::test]
#[ignore = "launches a real Chrome"]
async fn test_chat_flow_in_headless_chrome() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;

    let manager = SessionManager::new(Arc::new(ChromeLauncher));
    let session = manager.acquire(&headless()).await?;

    let flow = ChatFlow::new("mock", chat_settings(server.url()), selectors(false));
    let result = flow
        .run(&session, Diagnostics::disabled("mock"), "Write about tides")
        .await;
    manager.release(&session).await;

    let text = result?.into_text().expect("text artifact");
    assert!(text.starts_with("TITLE: Why the tide turns"));
    assert!(text.contains("KEYWORDS: tides, moon, ocean"));
    println!("✅ Stabilized response: {} chars", text.len());
    Ok(())
}

#[tokio::test]
#[ignore = "launches a real Chrome"]
async fn test_chat_flow_with_completion_indicator() -> anyhow::Result<()> {
    let server = TestServer::start().await;
    server.wait_ready().await?;

    let manager = SessionManager::new(Arc::new(ChromeLauncher));
    let session = manager.acquire(&headless()).await?;

    let flow = ChatFlow::new("mock", chat_settings(server.url()), selectors(true));
    let result = flow
        .run(&session, Diagnostics::disabled("mock"), "Write about tides")
        .await;
    manager.release(&session).await;

    let text = result?.into_text().expect("text artifact");
    assert!(text.contains("SCRIPT: Twice a day"));
    println!("✅ Indicator response: {} chars", text.len());
    Ok(())
}

#[tokio::test]
#[ignore = "launches a real Chrome"]
async fn test_released_session_reports_loss() -> anyhow::Result<()> {
    let manager = SessionManager::new(Arc::new(ChromeLauncher));
    let session = manager.acquire(&headless()).await?;
    assert!(session.is_alive().await);

    manager.release(&session).await;
    assert!(!session.is_alive().await);
    assert!(session.navigate("about:blank").await.unwrap_err().is_session_lost());
    Ok(())
}
