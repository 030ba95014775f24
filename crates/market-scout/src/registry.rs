//! Builds the enabled adapters once at startup.
//!
//! Shared resources (HTTP client, caches, browser session) are created
//! here and handed to adapters, so every adapter of a process sees the
//! same instances. Adapters whose configuration is unusable are recorded
//! as disabled rather than failing the whole build.

use crate::adapters::{DepopAdapter, EbayAdapter, FacebookAdapter, MercariAdapter};
use crate::aggregator::Aggregator;
use crate::cache::{LocationCache, TokenCache};
use crate::config::Config;
use crate::error::{MarketError, MarketResult};
use crate::http_client::HttpClient;
use crate::marketplace::{Marketplace, MarketplaceKind};
use crate::renderer::chromium::{find_browser, ChromiumLauncher};
use crate::renderer::{BrowserSession, RendererLauncher};
use std::sync::Arc;

/// Process-wide objects shared between adapters.
pub struct Resources {
    pub http: HttpClient,
    pub locations: Arc<LocationCache>,
    pub tokens: Arc<TokenCache>,
    pub session: Arc<BrowserSession>,
    /// Look for a local browser before enabling browser-backed adapters.
    verify_browser: bool,
}

impl Resources {
    /// Production resources backed by a local Chromium.
    pub fn new(config: &Config) -> Self {
        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone()));
        Self {
            verify_browser: true,
            ..Self::with_launcher(config, launcher)
        }
    }

    /// Resources with a caller-supplied browser launcher. No local browser
    /// lookup is done.
    pub fn with_launcher(config: &Config, launcher: Arc<dyn RendererLauncher>) -> Self {
        Self {
            http: HttpClient::new(&config.http),
            locations: Arc::new(LocationCache::new()),
            tokens: Arc::new(TokenCache::default()),
            session: Arc::new(BrowserSession::new(launcher)),
            verify_browser: false,
        }
    }
}

/// An enabled marketplace that could not be constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct DisabledAdapter {
    pub kind: MarketplaceKind,
    pub reason: String,
}

pub struct Registry {
    adapters: Vec<(MarketplaceKind, Arc<dyn Marketplace>)>,
    disabled: Vec<DisabledAdapter>,
    session: Arc<BrowserSession>,
}

impl Registry {
    /// Build with production resources.
    pub fn build(config: &Config) -> MarketResult<Self> {
        Self::build_with(config, Resources::new(config))
    }

    /// Build the enabled adapters in configuration order.
    pub fn build_with(config: &Config, resources: Resources) -> MarketResult<Self> {
        config.validate()?;

        let browser_problem = if resources.verify_browser
            && config.enabled.iter().any(|k| k.needs_browser())
        {
            find_browser(config.browser.executable.as_deref())
                .err()
                .map(|e| e.to_string())
        } else {
            None
        };

        let mut adapters: Vec<(MarketplaceKind, Arc<dyn Marketplace>)> = Vec::new();
        let mut disabled = Vec::new();

        for &kind in &config.enabled {
            let built = match (&browser_problem, kind.needs_browser()) {
                (Some(problem), true) => Err(MarketError::Configuration(problem.clone())),
                _ => make_adapter(kind, config, &resources),
            };
            match built {
                Ok(adapter) => adapters.push((kind, adapter)),
                Err(e) => {
                    tracing::warn!(marketplace = %kind, "adapter disabled: {e}");
                    disabled.push(DisabledAdapter {
                        kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            enabled = adapters.len(),
            disabled = disabled.len(),
            "marketplace registry built"
        );

        Ok(Self {
            adapters,
            disabled,
            session: resources.session,
        })
    }

    /// Adapter by marketplace name, e.g. `"ebay"`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Marketplace>> {
        let kind: MarketplaceKind = name.parse().ok()?;
        self.adapters
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, a)| Arc::clone(a))
    }

    pub fn kinds(&self) -> Vec<MarketplaceKind> {
        self.adapters.iter().map(|(k, _)| *k).collect()
    }

    pub fn disabled(&self) -> &[DisabledAdapter] {
        &self.disabled
    }

    /// An aggregator over every enabled adapter.
    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.adapters.iter().map(|(_, a)| Arc::clone(a)).collect())
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    /// Close the shared browser, if one was launched.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

fn make_adapter(
    kind: MarketplaceKind,
    config: &Config,
    resources: &Resources,
) -> MarketResult<Arc<dyn Marketplace>> {
    let nav_timeout = config.browser.navigation_timeout_ms;
    Ok(match kind {
        MarketplaceKind::Ebay => Arc::new(EbayAdapter::new(
            config.ebay.clone(),
            resources.http.clone(),
            Arc::clone(&resources.tokens),
        )?),
        MarketplaceKind::Facebook => Arc::new(FacebookAdapter::new(
            config.facebook.clone(),
            resources.http.clone(),
            Arc::clone(&resources.locations),
        )),
        MarketplaceKind::Mercari => Arc::new(
            MercariAdapter::new(config.mercari.clone(), Arc::clone(&resources.session))
                .with_navigation_timeout(nav_timeout),
        ),
        MarketplaceKind::Depop => Arc::new(
            DepopAdapter::new(config.depop.clone(), Arc::clone(&resources.session))
                .with_navigation_timeout(nav_timeout),
        ),
    })
}
