//! Renderer abstraction for browser-mediated adapters.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide), and the
//! process-wide [`BrowserSession`] that owns the shared instance.

pub mod chromium;
pub mod session;

pub use session::{BrowserSession, PageLease};

use crate::error::MarketError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A request issued through the page's own networking stack.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl PageRequest {
    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body.to_string()),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Response to a [`PageRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

/// A pending capture of the first JSON response matching a URL fragment.
///
/// The observer task (if any) is aborted when the capture is dropped.
pub struct ResponseCapture {
    rx: oneshot::Receiver<Value>,
    task: Option<JoinHandle<()>>,
}

impl ResponseCapture {
    pub fn from_parts(rx: oneshot::Receiver<Value>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// A capture that already holds its payload.
    pub fn ready(value: Value) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx, task: None }
    }

    /// Wait up to `grace` for the payload.
    pub async fn wait(mut self, grace: Duration) -> Option<Value> {
        match tokio::time::timeout(grace, &mut self.rx).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

impl Drop for ResponseCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
    /// False once the engine process has gone away.
    fn is_connected(&self) -> bool;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Wait until no new network requests start for `quiet_ms`.
    /// Returns false if the page never settled within `timeout_ms`.
    async fn wait_for_network_idle(&self, quiet_ms: u64, timeout_ms: u64) -> Result<bool>;
    /// Wait for a CSS selector to match. Returns false on timeout.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<Value>;
    /// Issue a request with the page's own `fetch`, inheriting its cookies.
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse>;
    /// Start buffering the first JSON response whose URL contains
    /// `url_fragment`. Must be called before navigating.
    async fn observe_json(&self, url_fragment: &str) -> Result<ResponseCapture>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Creates the shared browser engine on demand.
#[async_trait]
pub trait RendererLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Renderer>, MarketError>;
}
