//! Process-wide shared browser.
//!
//! One engine instance is launched lazily on the first page request and
//! reused after that; if it reports itself disconnected it is replaced on
//! the next request. Callers never touch the instance directly, they only
//! lease pages from it.

use super::{RenderContext, Renderer, RendererLauncher};
use crate::error::MarketError;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct BrowserSession {
    launcher: Arc<dyn RendererLauncher>,
    instance: Mutex<Option<Arc<dyn Renderer>>>,
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn RendererLauncher>) -> Self {
        Self {
            launcher,
            instance: Mutex::new(None),
        }
    }

    /// The shared engine, launching or relaunching it as needed.
    pub async fn renderer(&self) -> Result<Arc<dyn Renderer>, MarketError> {
        let mut slot = self.instance.lock().await;

        if let Some(existing) = slot.as_ref() {
            if existing.is_connected() {
                return Ok(Arc::clone(existing));
            }
            tracing::warn!("shared browser disconnected, relaunching");
            if let Some(stale) = slot.take() {
                let _ = stale.shutdown().await;
            }
        }

        let renderer = self.launcher.launch().await?;
        *slot = Some(Arc::clone(&renderer));
        Ok(renderer)
    }

    /// Lease a fresh page. The page is closed when the lease is released
    /// or dropped.
    pub async fn page(&self) -> Result<PageLease, MarketError> {
        let renderer = self.renderer().await?;
        let ctx = renderer.new_context().await.map_err(MarketError::Browser)?;
        Ok(PageLease { ctx: Some(ctx) })
    }

    /// Whether an engine is currently launched and connected.
    pub async fn is_running(&self) -> bool {
        self.instance
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.is_connected())
    }

    /// Close the shared engine. Safe to call more than once.
    pub async fn shutdown(&self) {
        let instance = self.instance.lock().await.take();
        if let Some(renderer) = instance {
            if let Err(e) = renderer.shutdown().await {
                tracing::warn!("browser shutdown failed: {e:#}");
            } else {
                tracing::info!("shared browser shut down");
            }
        }
    }
}

/// Exclusive use of one browser page.
///
/// Call [`PageLease::release`] on every normal exit path. If the lease is
/// dropped instead (a deadline fired, the future was cancelled) the close
/// is spawned onto the runtime.
pub struct PageLease {
    ctx: Option<Box<dyn RenderContext>>,
}

impl PageLease {
    pub async fn release(mut self) {
        if let Some(ctx) = self.ctx.take() {
            if let Err(e) = ctx.close().await {
                tracing::debug!("page close failed: {e:#}");
            }
        }
    }
}

impl Deref for PageLease {
    type Target = dyn RenderContext;

    fn deref(&self) -> &Self::Target {
        self.ctx.as_deref().expect("page lease used after release")
    }
}

impl DerefMut for PageLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_deref_mut().expect("page lease used after release")
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = ctx.close().await;
                    });
                }
                Err(_) => tracing::warn!("page lease dropped outside a runtime; page leaked"),
            }
        }
    }
}
