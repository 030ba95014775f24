//! Scripted browser fakes shared by the integration tests.
//!
//! `FakeLauncher` hands out `FakeRenderer`s whose pages answer from a
//! `PageScript` and record everything done to them in `FakeState`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use market_scout::renderer::{
    BrowserSession, NavigationResult, PageRequest, PageResponse, RenderContext, Renderer,
    RendererLauncher, ResponseCapture,
};
use market_scout::MarketError;

type FetchHandler = Arc<dyn Fn(&PageRequest) -> PageResponse + Send + Sync>;

/// What fake pages return.
#[derive(Clone)]
pub struct PageScript {
    /// HTML keyed by a fragment of the page URL; first match wins.
    pub pages: Vec<(String, String)>,
    pub fetch: FetchHandler,
    /// Payload delivered to `observe_json`; `None` means nothing ever arrives.
    pub captured: Option<Value>,
    pub selector_appears: bool,
    pub fail_navigation: bool,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            fetch: Arc::new(|_| PageResponse {
                status: 404,
                body: String::new(),
            }),
            captured: None,
            selector_appears: true,
            fail_navigation: false,
        }
    }
}

impl PageScript {
    pub fn page(mut self, url_fragment: &str, html: &str) -> Self {
        self.pages.push((url_fragment.to_string(), html.to_string()));
        self
    }

    pub fn on_fetch<F>(mut self, handler: F) -> Self
    where
        F: Fn(&PageRequest) -> PageResponse + Send + Sync + 'static,
    {
        self.fetch = Arc::new(handler);
        self
    }

    pub fn capture(mut self, payload: Value) -> Self {
        self.captured = Some(payload);
        self
    }
}

/// Everything the fakes observed.
#[derive(Default)]
pub struct FakeState {
    pub navigations: Mutex<Vec<String>>,
    pub fetches: Mutex<Vec<PageRequest>>,
    pub observed: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakeState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<PageRequest> {
        self.fetches.lock().unwrap().clone()
    }
}

pub struct FakeContext {
    script: PageScript,
    state: Arc<FakeState>,
    renderer_active: Arc<AtomicUsize>,
    url: String,
    /// Senders for captures that never resolve; held so the receiver only
    /// gives up on its grace timeout, as a live page listener would.
    listeners: Mutex<Vec<oneshot::Sender<Value>>>,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        self.state.navigations.lock().unwrap().push(url.to_string());
        if self.script.fail_navigation {
            bail!("net::ERR_CONNECTION_RESET at {url}");
        }
        self.url = url.to_string();
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn wait_for_network_idle(&self, _quiet_ms: u64, _timeout_ms: u64) -> Result<bool> {
        Ok(true)
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout_ms: u64) -> Result<bool> {
        Ok(self.script.selector_appears)
    }

    async fn execute_js(&self, _script: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse> {
        self.state.fetches.lock().unwrap().push(request.clone());
        Ok((self.script.fetch)(request))
    }

    async fn observe_json(&self, url_fragment: &str) -> Result<ResponseCapture> {
        self.state
            .observed
            .lock()
            .unwrap()
            .push(url_fragment.to_string());
        Ok(match &self.script.captured {
            Some(payload) => ResponseCapture::ready(payload.clone()),
            None => {
                let (tx, rx) = oneshot::channel();
                self.listeners.lock().unwrap().push(tx);
                ResponseCapture::from_parts(rx, None)
            }
        })
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self
            .script
            .pages
            .iter()
            .find(|(fragment, _)| self.url.contains(fragment.as_str()))
            .map(|(_, html)| html.clone())
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.renderer_active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeRenderer {
    script: PageScript,
    state: Arc<FakeState>,
    active: Arc<AtomicUsize>,
    connected: AtomicBool,
    shut_down: AtomicBool,
}

impl FakeRenderer {
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            script: self.script.clone(),
            state: Arc::clone(&self.state),
            renderer_active: Arc::clone(&self.active),
            url: "about:blank".to_string(),
            listeners: Mutex::new(Vec::new()),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher {
    script: PageScript,
    pub state: Arc<FakeState>,
    launches: AtomicUsize,
    renderers: Mutex<Vec<Arc<FakeRenderer>>>,
    fail: bool,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            state: Arc::new(FakeState::default()),
            launches: AtomicUsize::new(0),
            renderers: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    /// A launcher that behaves like a machine without a browser.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: PageScript::default(),
            state: Arc::new(FakeState::default()),
            launches: AtomicUsize::new(0),
            renderers: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> Option<Arc<FakeRenderer>> {
        self.renderers.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RendererLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Renderer>, MarketError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MarketError::Configuration(
                "no Chrome/Chromium executable found".to_string(),
            ));
        }
        let renderer = Arc::new(FakeRenderer {
            script: self.script.clone(),
            state: Arc::clone(&self.state),
            active: Arc::new(AtomicUsize::new(0)),
            connected: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
        });
        self.renderers.lock().unwrap().push(Arc::clone(&renderer));
        Ok(renderer)
    }
}

/// A session over a fresh fake launcher.
pub fn fake_session(script: PageScript) -> (Arc<BrowserSession>, Arc<FakeLauncher>) {
    let launcher = FakeLauncher::new(script);
    let session = Arc::new(BrowserSession::new(launcher.clone()));
    (session, launcher)
}

/// JSON response helper for scripted fetches.
pub fn json_response(status: u16, body: &Value) -> PageResponse {
    PageResponse {
        status,
        body: body.to_string(),
    }
}

/// Route scripted fetches by GraphQL `operationName`.
pub fn by_operation(
    routes: HashMap<&'static str, PageResponse>,
) -> impl Fn(&PageRequest) -> PageResponse + Send + Sync + 'static {
    move |req: &PageRequest| {
        let op = req
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str::<Value>(b).ok())
            .and_then(|v| v["operationName"].as_str().map(String::from))
            .unwrap_or_default();
        routes.get(op.as_str()).cloned().unwrap_or(PageResponse {
            status: 400,
            body: r#"{"errors":[{"message":"unknown operation"}]}"#.to_string(),
        })
    }
}

/// Let spawned lease-drop closes run.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("market_scout=debug")
        .with_test_writer()
        .try_init();
}
