//! The contract every marketplace adapter implements.
//!
//! Adapters differ wildly in how they reach their provider (signed REST,
//! undocumented GraphQL, a real browser), but all of them answer the same
//! three questions: search, detail, and reachability.

use crate::error::MarketError;
use crate::model::{Listing, ListingDetail, Outcome, Query};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// The closed set of marketplaces this crate knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketplaceKind {
    Ebay,
    Facebook,
    Mercari,
    Depop,
}

impl MarketplaceKind {
    pub const ALL: [MarketplaceKind; 4] = [
        MarketplaceKind::Ebay,
        MarketplaceKind::Facebook,
        MarketplaceKind::Mercari,
        MarketplaceKind::Depop,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MarketplaceKind::Ebay => "ebay",
            MarketplaceKind::Facebook => "facebook",
            MarketplaceKind::Mercari => "mercari",
            MarketplaceKind::Depop => "depop",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MarketplaceKind::Ebay => "eBay",
            MarketplaceKind::Facebook => "Facebook Marketplace",
            MarketplaceKind::Mercari => "Mercari",
            MarketplaceKind::Depop => "Depop",
        }
    }

    /// Whether this marketplace drives the shared headless browser.
    pub fn needs_browser(&self) -> bool {
        matches!(self, MarketplaceKind::Mercari | MarketplaceKind::Depop)
    }
}

impl fmt::Display for MarketplaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MarketplaceKind {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        MarketplaceKind::ALL
            .into_iter()
            .find(|k| k.name() == norm)
            .ok_or_else(|| MarketError::Configuration(format!("unknown marketplace: {s}")))
    }
}

/// Identity of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketplaceInfo {
    pub kind: MarketplaceKind,
    pub name: String,
    pub display_name: String,
    pub requires_auth: bool,
}

impl MarketplaceInfo {
    pub fn new(kind: MarketplaceKind, requires_auth: bool) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            display_name: kind.display_name().to_string(),
            requires_auth,
        }
    }
}

/// A successful page of results before it is wrapped in an [`Outcome`].
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub listings: Vec<Listing>,
    pub total_found: Option<u64>,
}

impl SearchPage {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self {
            listings,
            total_found: None,
        }
    }

    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total_found = total;
        self
    }
}

/// A marketplace integration.
#[async_trait]
pub trait Marketplace: Send + Sync {
    fn info(&self) -> &MarketplaceInfo;

    /// Search for listings. Never fails: every internal error, and the
    /// adapter's own deadline elapsing, comes back as a failed [`Outcome`].
    async fn search(&self, query: &Query) -> Outcome;

    /// Fetch the full record for one item id.
    async fn listing_details(&self, id: &str) -> Result<ListingDetail, MarketError>;

    /// Best-effort reachability check.
    async fn health_check(&self) -> bool;

    fn name(&self) -> &str {
        &self.info().name
    }
}

/// Run an adapter's search body under its deadline and fold the result
/// into an [`Outcome`].
pub async fn guarded_search<F>(info: &MarketplaceInfo, deadline: Duration, search: F) -> Outcome
where
    F: Future<Output = Result<SearchPage, MarketError>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(deadline, search).await {
        Ok(result) => result,
        Err(_) => Err(MarketError::Timeout(deadline.as_millis() as u64)),
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(page) => {
            tracing::debug!(
                marketplace = %info.name,
                count = page.listings.len(),
                elapsed_ms,
                "search completed"
            );
            Outcome::ok(&info.name, page.listings, page.total_found)
        }
        Err(e) => {
            tracing::warn!(
                marketplace = %info.name,
                error_kind = e.kind(),
                elapsed_ms,
                "search failed: {e}"
            );
            Outcome::failed(&info.name, e.to_string())
        }
    }
}

/// Currency symbol and magnitude pulled out of a formatted price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPrice {
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?|\.\d+").expect("amount regex is valid"))
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"[$\u{20AC}\u{00A3}\u{00A5}\u{20B9}]",
            r"|\b(?:USD|EUR|GBP|CAD|AUD|JPY|INR|CHF|MXN)\b",
        ))
        .expect("currency regex is valid")
    })
}

/// Parse a formatted price such as `"$1,234.56"` or `"£50"`.
///
/// Thousands separators are stripped. Text with no digits ("ask",
/// "Free?") yields no amount; callers keep the original string.
pub fn parse_price(text: &str) -> ParsedPrice {
    let amount = amount_re()
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|v| v.is_finite());
    let currency = currency_re().find(text).map(|m| m.as_str().to_string());
    ParsedPrice { amount, currency }
}

/// Format a numeric amount the way listings display prices.
pub fn format_price(amount: f64, currency: Option<&str>) -> String {
    let symbol = match currency {
        Some("USD") | None => "$",
        Some("GBP") => "\u{00A3}",
        Some("EUR") => "\u{20AC}",
        Some(other) => return format!("{other} {amount:.2}"),
    };
    format!("{symbol}{amount:.2}")
}

fn sold_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^\s*[\[\(]\s*(?:sold|pending|sale pending)\s*[\]\)]",
            r"|^\s*(?:sold|pending)\s*[-:!]",
            r"|\bsold\s+out\b",
            r"|[\[\(]\s*sold\s*[\]\)]\s*$",
        ))
        .expect("sold marker regex is valid")
    })
}

/// Best-effort textual sold/pending signal from a listing title.
///
/// This complements explicit status flags; neither takes precedence.
pub fn title_marks_unavailable(title: &str) -> bool {
    sold_marker_re().is_match(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_dollars_with_separator() {
        let p = parse_price("$1,234.56");
        assert_eq!(p.amount, Some(1234.56));
        assert_eq!(p.currency.as_deref(), Some("$"));
    }

    #[test]
    fn test_parse_price_leading_decimal() {
        let p = parse_price("$.99");
        assert_eq!(p.amount, Some(0.99));
        assert_eq!(p.currency.as_deref(), Some("$"));
        assert_eq!(parse_price("$0.99").amount, Some(0.99));
    }

    #[test]
    fn test_parse_price_pounds() {
        let p = parse_price("\u{00A3}50");
        assert_eq!(p.amount, Some(50.0));
        assert_eq!(p.currency.as_deref(), Some("\u{00A3}"));
    }

    #[test]
    fn test_parse_price_unparsable() {
        let p = parse_price("ask");
        assert_eq!(p.amount, None);
        assert_eq!(p.currency, None);
    }

    #[test]
    fn test_parse_price_iso_code() {
        let p = parse_price("USD 89.00");
        assert_eq!(p.amount, Some(89.0));
        assert_eq!(p.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(12.5, Some("USD")), "$12.50");
        assert_eq!(format_price(3.0, Some("GBP")), "\u{00A3}3.00");
        assert_eq!(format_price(7.0, Some("CAD")), "CAD 7.00");
    }

    #[test]
    fn test_title_sold_markers() {
        assert!(title_marks_unavailable("[SOLD] Herman Miller Aeron"));
        assert!(title_marks_unavailable("(pending) standing desk"));
        assert!(title_marks_unavailable("SOLD - bike rack"));
        assert!(title_marks_unavailable("Vintage lamp sold out"));
        assert!(title_marks_unavailable("Blue couch [sold]"));
        assert!(!title_marks_unavailable("Soldering iron kit"));
        assert!(!title_marks_unavailable("Gold watch, never sold before"));
    }

    #[test]
    fn test_marketplace_kind_parse() {
        assert_eq!(" Depop ".parse::<MarketplaceKind>().ok(), Some(MarketplaceKind::Depop));
        assert!("craigslist".parse::<MarketplaceKind>().is_err());
    }

    #[tokio::test]
    async fn test_guarded_search_converts_error() {
        let info = MarketplaceInfo::new(MarketplaceKind::Ebay, true);
        let out = guarded_search(&info, Duration::from_secs(1), async {
            Err(MarketError::SchemaDrift("items missing".into()))
        })
        .await;
        assert!(!out.success());
        assert!(out.error().unwrap().contains("schema drift"));
    }

    #[tokio::test]
    async fn test_guarded_search_deadline() {
        let info = MarketplaceInfo::new(MarketplaceKind::Facebook, false);
        let out = guarded_search(&info, Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(SearchPage::default())
        })
        .await;
        assert!(!out.success());
        assert!(out.error().unwrap().contains("timed out"));
    }
}
