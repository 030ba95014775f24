//! Validated configuration handed to the core by its caller.
//!
//! Nothing here reads the environment. The dispatcher loads credentials and
//! overrides however it likes, deserializes them into [`Config`], and calls
//! [`Config::validate`] before building the registry.

use crate::error::MarketError;
use crate::marketplace::MarketplaceKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for every adapter and shared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Marketplaces to register, in presentation order.
    pub enabled: Vec<MarketplaceKind>,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub ebay: EbayConfig,
    pub facebook: FacebookConfig,
    pub mercari: MercariConfig,
    pub depop: DepopConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: MarketplaceKind::ALL.to_vec(),
            http: HttpConfig::default(),
            browser: BrowserConfig::default(),
            ebay: EbayConfig::default(),
            facebook: FacebookConfig::default(),
            mercari: MercariConfig::default(),
            depop: DepopConfig::default(),
        }
    }
}

impl Config {
    /// Reject settings no adapter could run with.
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.enabled.is_empty() {
            return Err(MarketError::Configuration(
                "no marketplaces enabled".to_string(),
            ));
        }
        for (i, kind) in self.enabled.iter().enumerate() {
            if self.enabled[..i].contains(kind) {
                return Err(MarketError::Configuration(format!(
                    "marketplace listed twice: {kind}"
                )));
            }
        }
        let timeouts = [
            ("http.timeout_ms", self.http.timeout_ms),
            ("ebay.timeout_ms", self.ebay.timeout_ms),
            ("facebook.timeout_ms", self.facebook.timeout_ms),
            ("mercari.timeout_ms", self.mercari.timeout_ms),
            ("depop.timeout_ms", self.depop.timeout_ms),
            ("browser.launch_timeout_ms", self.browser.launch_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(MarketError::Configuration(format!("{field} must be > 0")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    /// Retries on 5xx / 429 / transport errors before giving up.
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_retries: 2,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Explicit browser executable. Takes precedence over discovery.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub launch_timeout_ms: u64,
    /// Default timeout for a single navigation.
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            launch_timeout_ms: 20_000,
            navigation_timeout_ms: 25_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EbayConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base: String,
    pub marketplace_id: String,
    pub currency: String,
    pub timeout_ms: u64,
}

impl Default for EbayConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: "https://api.ebay.com".to_string(),
            marketplace_id: "EBAY_US".to_string(),
            currency: "USD".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl EbayConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacebookConfig {
    pub base_url: String,
    pub graphql_url: String,
    /// Location used when the query carries none.
    pub default_location: String,
    pub radius_km: u32,
    pub search_doc_id: String,
    pub location_doc_id: String,
    pub listing_photos_doc_id: String,
    pub listing_details_doc_id: String,
    pub timeout_ms: u64,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.facebook.com".to_string(),
            graphql_url: "https://www.facebook.com/api/graphql/".to_string(),
            default_location: "San Francisco, CA".to_string(),
            radius_km: 40,
            search_doc_id: "7111939778879383".to_string(),
            location_doc_id: "7321914954515895".to_string(),
            listing_photos_doc_id: "10059604367394414".to_string(),
            listing_details_doc_id: "24056064890761782".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl FacebookConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MercariConfig {
    pub base_url: String,
    /// Internal API endpoint called through the page's own `fetch`.
    pub api_url: String,
    /// Quiet period that counts as "network settled".
    pub settle_ms: u64,
    pub timeout_ms: u64,
}

impl Default for MercariConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.mercari.com".to_string(),
            api_url: "https://www.mercari.com/v1/api".to_string(),
            settle_ms: 500,
            timeout_ms: 45_000,
        }
    }
}

impl MercariConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepopConfig {
    pub base_url: String,
    /// Response URLs containing this fragment are treated as search payloads.
    pub api_path_prefix: String,
    /// How long to wait for an intercepted payload after the page settles.
    pub grace_ms: u64,
    pub card_selector: String,
    pub settle_ms: u64,
    pub timeout_ms: u64,
}

impl Default for DepopConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.depop.com".to_string(),
            api_path_prefix: "/api/v3/search/products".to_string(),
            grace_ms: 1_500,
            card_selector: "[data-testid=\"product__item\"]".to_string(),
            settle_ms: 500,
            timeout_ms: 45_000,
        }
    }
}

impl DepopConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"enabled":["ebay","depop"],"ebay":{"client_id":"abc","client_secret":"xyz"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.enabled, vec![MarketplaceKind::Ebay, MarketplaceKind::Depop]);
        assert_eq!(cfg.ebay.client_id.as_deref(), Some("abc"));
        assert_eq!(cfg.ebay.marketplace_id, "EBAY_US");
        assert_eq!(cfg.depop.grace_ms, 1_500);
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicates() {
        let mut cfg = Config {
            enabled: vec![],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg.enabled = vec![MarketplaceKind::Mercari, MarketplaceKind::Mercari];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut cfg = Config::default();
        cfg.facebook.timeout_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("facebook.timeout_ms"));
    }

    #[test]
    fn test_unknown_marketplace_rejected() {
        let res: Result<Config, _> = serde_json::from_str(r#"{"enabled":["craigslist"]}"#);
        assert!(res.is_err());
    }
}
