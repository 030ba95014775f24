//! Chromium-based renderer using chromiumoxide.

use super::{
    NavigationResult, PageRequest, PageResponse, RenderContext, Renderer, RendererLauncher,
    ResponseCapture,
};
use crate::config::BrowserConfig;
use crate::error::MarketError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, FrameId, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Binary names tried on `PATH` after the well-known locations.
const PATH_CANDIDATES: [&str; 5] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Quiet period after which Chrome emits `networkIdle`.
const CHROME_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// True for the main frame's `networkIdle` lifecycle event.
fn signals_network_idle(event: &EventLifecycleEvent, main_frame: Option<&FrameId>) -> bool {
    event.name == "networkIdle" && main_frame.map_or(true, |id| &event.frame_id == id)
}

/// Well-known install locations for the current platform.
pub fn well_known_browser_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if cfg!(target_os = "macos") {
        for app in [
            "Google Chrome.app/Contents/MacOS/Google Chrome",
            "Chromium.app/Contents/MacOS/Chromium",
            "Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ] {
            paths.push(PathBuf::from("/Applications").join(app));
            if let Some(home) = dirs::home_dir() {
                paths.push(home.join("Applications").join(app));
            }
        }
    } else if cfg!(target_os = "windows") {
        for root in ["C:\\Program Files", "C:\\Program Files (x86)"] {
            paths.push(PathBuf::from(root).join("Google\\Chrome\\Application\\chrome.exe"));
            paths.push(PathBuf::from(root).join("Microsoft\\Edge\\Application\\msedge.exe"));
        }
        if let Some(local) = dirs::data_local_dir() {
            paths.push(local.join("Google\\Chrome\\Application\\chrome.exe"));
            paths.push(local.join("Chromium\\Application\\chrome.exe"));
        }
    } else {
        for p in [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
            "/usr/bin/microsoft-edge",
        ] {
            paths.push(PathBuf::from(p));
        }
    }
    paths
}

/// Locate a usable browser executable.
///
/// An explicit override wins; if it does not exist that is an error, not a
/// cue to keep looking. Otherwise the well-known locations are tried, then
/// `PATH`.
pub fn find_browser(override_path: Option<&Path>) -> Result<PathBuf, MarketError> {
    if let Some(path) = override_path {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(MarketError::Configuration(format!(
            "browser executable override not found: {}",
            path.display()
        )));
    }

    if let Some(found) = well_known_browser_paths().into_iter().find(|p| p.is_file()) {
        return Ok(found);
    }

    for name in PATH_CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(MarketError::Configuration(
        "no Chrome/Chromium executable found; install one or set browser.executable".to_string(),
    ))
}

/// Launches Chromium for the [`BrowserSession`](super::BrowserSession).
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RendererLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn Renderer>, MarketError> {
        let executable = find_browser(self.config.executable.as_deref())?;
        let timeout = Duration::from_millis(self.config.launch_timeout_ms);
        let renderer =
            tokio::time::timeout(timeout, ChromiumRenderer::launch(executable, &self.config))
                .await
                .map_err(|_| MarketError::Timeout(self.config.launch_timeout_ms))?
                .map_err(MarketError::Browser)?;
        Ok(Arc::new(renderer))
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance from the given executable.
    pub async fn launch(executable: PathBuf, config: &BrowserConfig) -> Result<Self> {
        let mut builder = ChromeConfig::builder()
            .chrome_executable(&executable)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--window-size=1366,900");
        builder = if config.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let chrome_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .with_context(|| format!("failed to launch {}", executable.display()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                }
            }
            flag.store(false, Ordering::SeqCst);
            tracing::info!("browser connection closed");
        });

        tracing::info!("launched browser: {}", executable.display());

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            connected,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if self.connected.load(Ordering::SeqCst) {
            if let Err(e) = browser.close().await {
                tracing::debug!("browser close failed: {e}");
            }
            let _ = browser.wait().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut task) = self.handler_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

/// Builds the script the page runs to issue a request with its own `fetch`.
fn fetch_script(request: &PageRequest) -> String {
    let headers: serde_json::Map<String, Value> = request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let init = serde_json::json!({
        "method": request.method,
        "headers": headers,
        "body": request.body,
        "credentials": "include",
    });
    format!(
        "(async () => {{ \
            const r = await fetch({url}, {init}); \
            return {{ status: r.status, body: await r.text() }}; \
        }})()",
        url = Value::String(request.url.clone()),
        init = init,
    )
}

async fn read_response_body(page: &Page, request_id: RequestId) -> Option<Value> {
    for attempt in 1..=5u64 {
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(resp) => {
                let body = &resp.result;
                let text = if body.base64_encoded {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(&body.body)
                        .ok()?;
                    String::from_utf8(bytes).ok()?
                } else {
                    body.body.clone()
                };
                return serde_json::from_str(&text).ok();
            }
            // Body is not available until loading finishes.
            Err(_) => tokio::time::sleep(Duration::from_millis(100 * attempt)).await,
        }
    }
    None
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn wait_for_network_idle(&self, quiet_ms: u64, timeout_ms: u64) -> Result<bool> {
        let start = Instant::now();
        let budget = Duration::from_millis(timeout_ms);
        let mut events = self
            .page
            .event_listener::<EventLifecycleEvent>()
            .await
            .context("subscribing to lifecycle events")?;
        // Enabling replays the events already fired for the current document.
        self.page
            .execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .context("enabling lifecycle events")?;
        let main_frame = self.page.mainframe().await.ok().flatten();

        let idle = async {
            while let Some(event) = events.next().await {
                if signals_network_idle(&event, main_frame.as_ref()) {
                    return true;
                }
            }
            false
        };
        match tokio::time::timeout(budget, idle).await {
            Ok(true) => {}
            Ok(false) | Err(_) => return Ok(false),
        }

        // Chrome reports idle after a fixed quiet window; pad longer ones.
        let pad = Duration::from_millis(quiet_ms).saturating_sub(CHROME_IDLE_WINDOW);
        let remaining = budget.saturating_sub(start.elapsed());
        tokio::time::sleep(pad.min(remaining)).await;
        Ok(pad <= remaining)
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    async fn execute_js(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse> {
        let value = self
            .execute_js(&fetch_script(request))
            .await
            .with_context(|| format!("in-page fetch of {} failed", request.url))?;
        let status = value["status"]
            .as_u64()
            .context("in-page fetch returned no status")? as u16;
        let body = value["body"].as_str().unwrap_or_default().to_string();
        Ok(PageResponse { status, body })
    }

    async fn observe_json(&self, url_fragment: &str) -> Result<ResponseCapture> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to network responses")?;

        let page = self.page.clone();
        let fragment = url_fragment.to_string();
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let response = &event.response;
                if !response.url.contains(&fragment) || !response.mime_type.contains("json") {
                    continue;
                }
                if let Some(value) = read_response_body(&page, event.request_id.clone()).await {
                    tracing::debug!("captured JSON response from {}", response.url);
                    let _ = tx.send(value);
                    return;
                }
            }
        });

        Ok(ResponseCapture::from_parts(rx, Some(task)))
    }

    async fn get_html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        let html: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))?;

        Ok(html)
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}
