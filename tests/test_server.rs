//! Local HTTP server for tests
//!
//! Serves a small chat-style page whose answer streams in over a few hundred
//! milliseconds, so the real browser path can be exercised without network access.
//!
//! Each server instance runs on a random available port.

use std::net::SocketAddr;
use tokio::sync::oneshot;
use warp::Filter;

const CHAT_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <title>Mock Chat</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
    <div id="cookie-banner"><button id="cookie-accept" onclick="this.parentNode.remove()">Accept</button></div>
    <main>
        <div class="answers"></div>
        <textarea id="prompt-textarea" rows="4" cols="60"></textarea>
        <button id="send" data-testid="send-button">Send</button>
    </main>
    <script>
        const chunks = [
            "TITLE: Why the tide turns\n",
            "SCRIPT: Twice a day the sea walks away from the shore.\n",
            "DESCRIPTION: A one minute explainer on tides.\n",
            "KEYWORDS: tides, moon, ocean"
        ];
        document.getElementById("send").addEventListener("click", () => {
            const prompt = document.getElementById("prompt-textarea").value;
            const answer = document.createElement("div");
            answer.className = "markdown";
            answer.dataset.prompt = prompt;
            document.querySelector(".answers").appendChild(answer);
            let i = 0;
            const timer = setInterval(() => {
                answer.innerText += chunks[i++];
                if (i === chunks.length) {
                    clearInterval(timer);
                    const done = document.createElement("button");
                    done.id = "regenerate";
                    done.innerText = "Regenerate";
                    document.body.appendChild(done);
                }
            }, 150);
        });
    </script>
</body>
</html>"#;

/// Test server that serves the mock chat page
pub struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a new test server on a random available port
    pub async fn start() -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let index = warp::path::end().map(|| warp::reply::html(CHAT_PAGE));
        let health = warp::path("health").map(|| "ok");

        let routes = index.or(health);

        let (addr, server) =
            warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
                shutdown_rx.await.ok();
            });

        tokio::spawn(server);

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Base URL for this server (e.g., "http://127.0.0.1:12345")
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the server to answer its health check
    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.url());
        let max_attempts = 10;

        for attempt in 1..=max_attempts {
            match reqwest::get(&url).await {
                Ok(response) if response.status().is_success() => {
                    println!("✅ Test server ready on: {}", self.url());
                    return Ok(());
                }
                Ok(response) => {
                    println!(
                        "⚠️ Attempt {}: Server returned status {}",
                        attempt,
                        response.status()
                    );
                }
                Err(e) => {
                    println!("⚠️ Attempt {}: Server not ready - {}", attempt, e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            }
        }

        anyhow::bail!(
            "Server did not become ready after {} attempts",
            max_attempts
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
