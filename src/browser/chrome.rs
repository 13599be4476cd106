// spider_chrome re-exports chromiumoxide API
use crate::browser::driver::{
    BrowserFamily, BrowserLauncher, ElementRef, LaunchOptions, PageDriver, WaitCondition,
};
use crate::error::{BrowserError, Result};
use crate::selectors::{Locator, LocatorKind};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use chromiumoxide_fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const REF_ATTRIBUTE: &str = "data-autopilot-ref";

/// Flags applied to every launched browser.
const LAUNCH_ARGS: [&str; 7] = [
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--lang=en-US",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-blink-features=AutomationControlled",
];

const HIDE_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// A DevTools-protocol session on one page of a Chromium-family browser.
pub struct ChromeDriver {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    temp_dir: Option<PathBuf>,
}

impl ChromeDriver {
    /// Launch a fresh browser process.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let executable = match &options.executable {
            Some(path) => Some(path.clone()),
            None => Self::default_executable(options.family).await,
        };

        // A throwaway profile keeps parallel sessions from sharing profile locks
        let (profile_dir, temp_dir) = match &options.profile_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let unique_id = chrono::Utc::now()
                    .timestamp_nanos_opt()
                    .unwrap_or_default();
                let dir = std::env::temp_dir().join(format!("autopilot-profile-{}", unique_id));
                std::fs::create_dir_all(&dir).map_err(|e| {
                    BrowserError::LaunchFailed(format!("Failed to create temp profile: {}", e))
                })?;
                (dir.clone(), Some(dir))
            }
        };

        let mut config = if options.headless {
            BrowserConfig::builder().arg("--headless=new")
        } else {
            BrowserConfig::builder().with_head()
        };
        let (width, height) = options.window_size;
        config = config
            .user_data_dir(&profile_dir)
            .window_size(width, height)
            .arg(format!("--window-size={},{}", width, height));
        for arg in LAUNCH_ARGS {
            config = config.arg(arg);
        }
        if let Some(path) = executable {
            config = config.chrome_executable(path);
        }

        let config = config.build().map_err(|e| {
            BrowserError::LaunchFailed(format!("Invalid {} config: {}", options.family, e))
        })?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            BrowserError::LaunchFailed(format!("Failed to start {}: {}", options.family, e))
        })?;

        let handler = tokio::spawn(async move {
            while (handler.next().await).is_some() {
                // Drive browser events
            }
        });

        let page = match Self::active_page(&browser).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(e);
            }
        };
        if let Err(e) = page.evaluate_on_new_document(HIDE_WEBDRIVER_JS).await {
            log::debug!("Could not install navigator.webdriver override: {}", e);
        }

        log::info!(
            "Launched {} (headless: {}, profile: {})",
            options.family,
            options.headless,
            profile_dir.display()
        );

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
            temp_dir,
        })
    }

    /// Connect to a browser already listening on a remote-debugging port.
    pub async fn connect_debug_port(port: u16) -> Result<Self> {
        let url = format!("http://localhost:{}", port);
        let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
            BrowserError::ConnectionFailed(format!(
                "Failed to connect on port {}. \
                 Make sure the browser is running with --remote-debugging-port={}: {}",
                port, port, e
            ))
        })?;

        let handler = tokio::spawn(async move {
            while (handler.next().await).is_some() {
                // Drive browser events
            }
        });

        let page = match Self::active_page(&browser).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(e);
            }
        };

        log::info!("Attached to running browser on port {}", port);
        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
            temp_dir: None,
        })
    }

    /// First page that is not an internal chrome:// page, else a new blank one.
    async fn active_page(browser: &Browser) -> Result<Page> {
        let pages = browser.pages().await?;
        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") && !url.starts_with("edge://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to create page: {}", e)))
    }

    async fn default_executable(family: BrowserFamily) -> Option<PathBuf> {
        match family {
            BrowserFamily::Chrome => match Self::ensure_chrome_installed().await {
                Ok(path) => Some(path),
                Err(e) => {
                    // Let chromiumoxide look for a system install
                    log::warn!("Chrome auto-download failed ({}), trying system Chrome", e);
                    None
                }
            },
            BrowserFamily::Edge => {
                let found = find_edge_executable();
                if found.is_none() {
                    log::warn!("No Edge executable found on well-known paths or PATH");
                }
                found
            }
        }
    }

    /// Ensure Chrome is installed, downloading if necessary
    async fn ensure_chrome_installed() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| BrowserError::Other("Cannot determine cache directory".to_string()))?
            .join("autopilot-webdriver")
            .join("chrome");

        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to create cache dir: {}", e)))?;

        let marker = cache_dir.join(".downloaded");
        if marker.exists() {
            if let Some(executable) = find_chrome_in_cache(&cache_dir) {
                return Ok(executable);
            }
        }

        log::info!("Downloading Chromium into {} (first run only)", cache_dir.display());
        let fetcher = BrowserFetcher::new(
            BrowserFetcherOptions::builder()
                .with_path(&cache_dir)
                .build()
                .map_err(|e| BrowserError::Other(format!("Fetcher config failed: {}", e)))?,
        );

        let info = fetcher
            .fetch()
            .await
            .map_err(|e| BrowserError::Other(format!("Chrome download failed: {}", e)))?;

        tokio::fs::write(&marker, "downloaded")
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to write marker: {}", e)))?;

        Ok(info.executable_path)
    }

    /// Re-find a probed element by the reference attribute stamped on it.
    async fn element(&self, element: &ElementRef) -> Result<Element> {
        let selector = ref_selector(&element.id);
        self.page
            .find_element(selector)
            .await
            .map_err(|e| match BrowserError::from(e) {
                lost @ BrowserError::SessionLost(_) => lost,
                other => BrowserError::StaleElement(format!("{} ({})", element.locator, other)),
            })
    }

    async fn evaluate_bool(&self, script: String) -> Result<bool> {
        let result = self.page.evaluate(script).await?;
        Ok(result
            .value()
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::page::NavigateParams;

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| BrowserError::NavigationFailed(format!("Invalid URL {}: {}", url, e)))?;

        let response = self.page.execute(params).await.map_err(|e| {
            match BrowserError::from(e) {
                lost @ BrowserError::SessionLost(_) => lost,
                other => BrowserError::NavigationFailed(format!(
                    "Failed to navigate to {}: {}",
                    url, other
                )),
            }
        })?;

        if let Some(error_text) = response.result.error_text {
            return Err(BrowserError::NavigationFailed(format!(
                "Navigation error for {}: {}",
                url, error_text
            )));
        }
        Ok(())
    }

    async fn is_document_ready(&self) -> Result<bool> {
        let result = self.page.evaluate("document.readyState").await?;
        Ok(result.value().and_then(|v| v.as_str()) == Some("complete"))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self.page.url().await?.ok_or(BrowserError::NoPage)?;
        Ok(url)
    }

    async fn probe(
        &self,
        locator: &Locator,
        condition: WaitCondition,
    ) -> Result<Option<ElementRef>> {
        let result = self.page.evaluate(probe_script(locator, condition)).await?;
        Ok(result
            .value()
            .and_then(|v| v.as_str())
            .map(|id| ElementRef {
                id: id.to_string(),
                locator: locator.clone(),
            }))
    }

    async fn is_clickable(&self, element: &ElementRef) -> Result<bool> {
        self.evaluate_bool(clickable_script(&element.id)).await
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        let handle = self.element(element).await?;
        handle.scroll_into_view().await?;
        handle.click().await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<()> {
        let handle = self.element(element).await?;
        handle.focus().await?;
        self.page.evaluate(select_all_script(&element.id)).await?;
        handle.press_key("Backspace").await?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<()> {
        let handle = self.element(element).await?;
        handle.focus().await?;
        handle.type_str(text).await?;
        Ok(())
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        let handle = self.element(element).await?;
        Ok(handle.inner_text().await?.unwrap_or_default())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let data = self
            .page
            .screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await?;
        Ok(data)
    }

    /// Check if the browser is still alive and responsive
    async fn is_alive(&self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.page.url()).await,
            Ok(Ok(_))
        )
    }

    async fn quit(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await;
        self.handler.abort();
        closed.map_err(|e| BrowserError::Other(format!("Failed to close browser: {}", e)))?;
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.handler.abort();
        Ok(())
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}

/// Launches and attaches [`ChromeDriver`] sessions.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn attach(&self, port: u16) -> Result<Arc<dyn PageDriver>> {
        let driver = ChromeDriver::connect_debug_port(port).await?;
        Ok(Arc::new(driver))
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn PageDriver>> {
        let driver = ChromeDriver::launch(options).await?;
        Ok(Arc::new(driver))
    }
}

fn find_chrome_in_cache(cache_dir: &Path) -> Option<PathBuf> {
    [
        "chrome",
        "chrome.exe",
        "Google Chrome.app/Contents/MacOS/Google Chrome",
        "chrome-linux/chrome",
        "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
        "chrome-win/chrome.exe",
    ]
    .iter()
    .map(|rel| cache_dir.join(rel))
    .find(|path| path.exists())
}

fn find_edge_executable() -> Option<PathBuf> {
    let known = [
        "/usr/bin/microsoft-edge",
        "/usr/bin/microsoft-edge-stable",
        "/opt/microsoft/msedge/msedge",
        "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
    ];
    if let Some(path) = known.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Some(path);
    }

    let names = ["microsoft-edge", "microsoft-edge-stable", "msedge", "msedge.exe"];
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

fn ref_selector(id: &str) -> String {
    format!("[{}=\"{}\"]", REF_ATTRIBUTE, id)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Resolve one locator, check the condition, and stamp a reference id on the match.
fn probe_script(locator: &Locator, condition: WaitCondition) -> String {
    let lookup = match locator.kind() {
        LocatorKind::XPath => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_string(locator.value())
        ),
        LocatorKind::Css => format!("document.querySelector({})", js_string(locator.value())),
    };
    let require_visible = condition == WaitCondition::Visible;

    format!(
        r#"(() => {{
  const el = {lookup};
  if (!el || el.nodeType !== 1) return null;
  if ({require_visible}) {{
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') return null;
  }}
  let id = el.getAttribute('{attr}');
  if (!id) {{
    window.__autopilotRefSeq = (window.__autopilotRefSeq || 0) + 1;
    id = 'ap-' + window.__autopilotRefSeq;
    el.setAttribute('{attr}', id);
  }}
  return id;
}})()"#,
        lookup = lookup,
        require_visible = require_visible,
        attr = REF_ATTRIBUTE,
    )
}

fn clickable_script(id: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') return false;
  return !el.disabled && el.getAttribute('aria-disabled') !== 'true';
}})()"#,
        selector = js_string(&ref_selector(id)),
    )
}

fn select_all_script(id: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  if (typeof el.select === 'function') {{ el.select(); }} else {{ document.execCommand('selectAll', false, null); }}
  return true;
}})()"#,
        selector = js_string(&ref_selector(id)),
    )
}
