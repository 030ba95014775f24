//! Depop adapter.
//!
//! The search page fetches its results from an internal JSON endpoint. We
//! listen for that response while the page loads and use it when it shows
//! up; when it doesn't (blocked, renamed, served from cache) the rendered
//! product grid is scraped instead. Both paths produce the same listing
//! shape, keyed by the product slug.

use super::{json_number, json_text};
use crate::config::DepopConfig;
use crate::error::{MarketError, MarketResult};
use crate::marketplace::{
    format_price, guarded_search, Marketplace, MarketplaceInfo, MarketplaceKind, SearchPage,
};
use crate::model::{Condition, Listing, ListingDetail, Outcome, Query, SortOrder};
use crate::renderer::{BrowserSession, PageLease};
use crate::structured::{element_text, extract_page_metadata, first_text};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 25_000;
const SETTLE_TIMEOUT_MS: u64 = 10_000;
const CARD_WAIT_MS: u64 = 8_000;

const NO_RESULTS_SELECTOR: &str = r#"[data-testid="search__no-results"]"#;
const DESCRIPTION_SELECTOR: &str = r#"[data-testid="product__description"]"#;
const SELLER_SELECTORS: [&str; 2] = [
    r#"[data-testid="bio__username"]"#,
    r#"a[data-testid="seller__link"]"#,
];

/// Colours the search page accepts.
const KNOWN_COLOURS: &[&str] = &[
    "black", "grey", "white", "brown", "tan", "cream", "yellow", "red", "burgundy", "orange",
    "pink", "purple", "blue", "navy", "green", "khaki", "multi", "silver", "gold",
];

fn sort_param(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::Relevance => "relevance",
        SortOrder::Newest => "newlyListed",
        SortOrder::PriceLowToHigh => "priceAscending",
        SortOrder::PriceHighToLow => "priceDescending",
    }
}

fn condition_params(condition: Condition) -> &'static [&'static str] {
    match condition {
        Condition::New => &["brand_new"],
        Condition::LikeNew => &["used_like_new", "used_excellent"],
        Condition::Good => &["used_good"],
        // No worse bucket exists.
        Condition::Fair | Condition::Poor => &["used_fair"],
    }
}

fn normalize_colour(colour: &str) -> Option<&'static str> {
    let lower = colour.trim().to_ascii_lowercase();
    let lower = if lower == "gray" { "grey".to_string() } else { lower };
    KNOWN_COLOURS.iter().copied().find(|c| *c == lower)
}

fn size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?:w|waist)(\d{2})|(\d{2})w|(us|uk|eu)(\d{1,2}(?:\.5)?))$")
            .expect("size regex is valid")
    })
}

/// Map a free-form size onto the search page's size values: letter sizes
/// `XS`..`XXL`, waists `W24`..`W44`, and shoe sizes such as `US9.5`,
/// `UK8` or `EU42`.
fn normalize_size(size: &str) -> Option<String> {
    let compact: String = size
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect();
    let letter = match compact.as_str() {
        "xs" | "extrasmall" => Some("XS"),
        "s" | "small" => Some("S"),
        "m" | "med" | "medium" => Some("M"),
        "l" | "large" => Some("L"),
        "xl" | "extralarge" => Some("XL"),
        "xxl" | "2xl" => Some("XXL"),
        _ => None,
    };
    if let Some(letter) = letter {
        return Some(letter.to_string());
    }

    let caps = size_re().captures(&compact)?;
    if let Some(waist) = caps.get(1).or_else(|| caps.get(2)) {
        let n: u32 = waist.as_str().parse().ok()?;
        return (24..=44).contains(&n).then(|| format!("W{n}"));
    }
    let system = caps.get(3)?.as_str();
    let number = caps.get(4)?.as_str();
    let value: f64 = number.parse().ok()?;
    let (range, halves) = match system {
        "us" => (4.0..=15.0, true),
        "uk" => (3.0..=14.0, true),
        _ => (35.0..=50.0, false),
    };
    if !range.contains(&value) || (!halves && value.fract() != 0.0) {
        return None;
    }
    Some(format!("{}{number}", system.to_ascii_uppercase()))
}

/// Build the search page URL with every filter mapped to Depop's vocabulary.
pub fn search_url(base_url: &str, query: &Query) -> MarketResult<Url> {
    let mut url = Url::parse(&format!("{}/search/", base_url.trim_end_matches('/')))
        .map_err(|e| MarketError::Configuration(format!("invalid depop.base_url: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("q", query.text());
        if query.sort() != SortOrder::Relevance {
            pairs.append_pair("sort", sort_param(query.sort()));
        }
        if let Some(condition) = query.condition() {
            pairs.append_pair("conditions", &condition_params(condition).join(","));
        }
        if let Some(min) = query.price_min() {
            pairs.append_pair("priceMin", &super::format_bound(min));
        }
        if let Some(max) = query.price_max() {
            pairs.append_pair("priceMax", &super::format_bound(max));
        }
        let sizes: Vec<String> = query
            .sizes()
            .iter()
            .filter_map(|s| {
                let known = normalize_size(s);
                if known.is_none() {
                    tracing::debug!(size = %s, "ignoring unknown Depop size");
                }
                known
            })
            .collect();
        if !sizes.is_empty() {
            pairs.append_pair("sizes", &sizes.join(","));
        }
        let colours: Vec<&str> = query
            .colors()
            .iter()
            .filter_map(|c| {
                let known = normalize_colour(c);
                if known.is_none() {
                    tracing::debug!(colour = %c, "ignoring unknown Depop colour");
                }
                known
            })
            .collect();
        if !colours.is_empty() {
            pairs.append_pair("colours", &colours.join(","));
        }
        if let Some(category) = query.category() {
            pairs.append_pair("categories", category);
        }
    }
    Ok(url)
}

fn product_url(base_url: &str, slug: &str) -> String {
    format!("{}/products/{slug}/", base_url.trim_end_matches('/'))
}

/// Title for items that don't carry one: "brand – size", else the slug
/// without its leading username.
pub fn synthesize_title(brand: Option<&str>, size: Option<&str>, slug: &str) -> String {
    match (brand, size) {
        (Some(b), Some(s)) => format!("{b} \u{2013} {s}"),
        (Some(b), None) => b.to_string(),
        _ => {
            let words: Vec<&str> = slug.split('-').filter(|w| !w.is_empty()).collect();
            let words = if words.len() > 1 { &words[1..] } else { &words[..] };
            let text = words.join(" ");
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => slug.to_string(),
            }
        }
    }
}

/// A parsed product plus the availability signal the filter needs.
#[derive(Debug, Clone)]
struct DepopItem {
    listing: Listing,
    sold: bool,
}

fn finish(items: Vec<DepopItem>, limit: usize, show_unavailable: bool) -> Vec<Listing> {
    items
        .into_iter()
        .filter(|i| show_unavailable || !i.sold)
        .map(|i| i.listing)
        .take(limit)
        .collect()
}

/// Largest preview image in a `{"150": url, "640": url}` map.
fn largest_preview(v: &Value) -> Option<String> {
    v.as_object()?
        .iter()
        .filter_map(|(k, url)| Some((k.parse::<u32>().ok()?, url.as_str()?)))
        .max_by_key(|(size, _)| *size)
        .map(|(_, url)| url.to_string())
}

fn parse_api_product(p: &Value, base_url: &str) -> Option<DepopItem> {
    let slug = json_text(p, "/slug")?;
    let brand = json_text(p, "/brandName").or_else(|| json_text(p, "/brand"));
    let size = p
        .get("sizes")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .and_then(|s| s.as_str().map(String::from).or_else(|| json_text(s, "/name")));
    let title = json_text(p, "/title")
        .or_else(|| {
            json_text(p, "/description").map(|d| d.lines().next().unwrap_or("").to_string())
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| synthesize_title(brand.as_deref(), size.as_deref(), &slug));

    let amount = json_number(p, "/price/discountedPriceAmount")
        .or_else(|| json_number(p, "/price/priceAmount"));
    let currency = json_text(p, "/price/currencyName");
    let price = amount
        .map(|a| format_price(a, currency.as_deref()))
        .unwrap_or_else(|| "See listing".to_string());

    let mut listing = Listing::new("depop", slug.clone(), title, price);
    listing.images = p
        .get("preview")
        .and_then(largest_preview)
        .into_iter()
        .chain(
            p.get("pictures")
                .and_then(|pics| pics.as_array())
                .into_iter()
                .flatten()
                .filter_map(largest_preview),
        )
        .fold(Vec::new(), |mut acc, img| {
            if !acc.contains(&img) {
                acc.push(img);
            }
            acc
        });
    listing.seller = json_text(p, "/seller/username");
    listing.condition = json_text(p, "/condition");
    listing.url = Some(product_url(base_url, &slug));

    let sold = json_text(p, "/status").is_some_and(|s| s.eq_ignore_ascii_case("sold"))
        || p.get("sold").and_then(|s| s.as_bool()) == Some(true);
    Some(DepopItem { listing, sold })
}

/// Parse an intercepted search payload.
///
/// Returns `None` when the payload doesn't look like a search response; a
/// response with zero products is still a valid (empty) answer.
fn parse_api_payload(payload: &Value, base_url: &str) -> Option<(Vec<DepopItem>, Option<u64>)> {
    let products = payload.get("products")?.as_array()?;
    let items = products
        .iter()
        .filter_map(|p| parse_api_product(p, base_url))
        .collect();
    let total = payload
        .pointer("/meta/totalCount")
        .or_else(|| payload.pointer("/meta/total_count"))
        .and_then(|t| t.as_u64());
    Some((items, total))
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/products/([^/?#]+)").expect("slug regex is valid"))
}

fn css(sel: &str) -> Selector {
    Selector::parse(sel).expect("static selector is valid")
}

fn first_in(card: &ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|s| {
        card.select(&css(s))
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty())
    })
}

fn parse_card(card: &ElementRef<'_>, base_url: &str) -> Option<DepopItem> {
    let href = card
        .select(&css(r#"a[href*="/products/"]"#))
        .next()
        .and_then(|a| a.value().attr("href"))
        .or_else(|| card.value().attr("href"))?;
    let slug = slug_re().captures(href)?.get(1)?.as_str().to_string();

    let img = card.select(&css("img")).next();
    let image = img.and_then(|i| i.value().attr("src").or_else(|| i.value().attr("data-src")));
    let alt = img
        .and_then(|i| i.value().attr("alt"))
        .map(str::trim)
        .filter(|a| !a.is_empty());

    let brand = first_in(card, &[r#"[data-testid="product__brand"]"#, r#"p[class*="brand"]"#]);
    let size = first_in(card, &[r#"[data-testid="product__size"]"#, r#"p[class*="size"]"#]);
    let price = card
        .select(&css(r#"[data-testid="product__price"], [aria-label="Price"], p[class*="price"]"#))
        .map(|el| element_text(&el))
        .find(|t| t.chars().any(|c| c.is_ascii_digit()))
        .unwrap_or_else(|| "See listing".to_string());

    let title = alt
        .map(String::from)
        .unwrap_or_else(|| synthesize_title(brand.as_deref(), size.as_deref(), &slug));

    let mut listing = Listing::new("depop", slug.clone(), title, price);
    listing.images = image.map(String::from).into_iter().collect();
    listing.url = Some(product_url(base_url, &slug));

    let sold = card
        .select(&css(r#"[data-testid="product__sold"], [class*="soldBadge"]"#))
        .next()
        .is_some();
    Some(DepopItem { listing, sold })
}

/// Scrape the rendered product grid.
fn parse_cards(html: &str, card_selector: &str, base_url: &str) -> MarketResult<Vec<DepopItem>> {
    let selector = Selector::parse(card_selector).map_err(|e| {
        MarketError::Configuration(format!("invalid depop.card_selector: {e:?}"))
    })?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .filter_map(|card| parse_card(&card, base_url))
        .collect())
}

fn has_no_results_marker(html: &str) -> bool {
    Html::parse_document(html)
        .select(&css(NO_RESULTS_SELECTOR))
        .next()
        .is_some()
}

/// Extraction strategies, tried in order until one yields data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Intercepted,
    Structural,
}

const STRATEGY_CHAIN: [Strategy; 2] = [Strategy::Intercepted, Strategy::Structural];

pub struct DepopAdapter {
    info: MarketplaceInfo,
    config: DepopConfig,
    session: Arc<BrowserSession>,
    navigation_timeout_ms: u64,
}

impl DepopAdapter {
    pub fn new(config: DepopConfig, session: Arc<BrowserSession>) -> Self {
        Self {
            info: MarketplaceInfo::new(MarketplaceKind::Depop, false),
            config,
            session,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }

    pub fn with_navigation_timeout(mut self, timeout_ms: u64) -> Self {
        self.navigation_timeout_ms = timeout_ms;
        self
    }

    async fn load(&self, page: &mut PageLease, url: &str) -> MarketResult<()> {
        page.navigate(url, self.navigation_timeout_ms)
            .await
            .map_err(MarketError::Browser)?;
        let settled = page
            .wait_for_network_idle(self.config.settle_ms, SETTLE_TIMEOUT_MS)
            .await
            .map_err(MarketError::Browser)?;
        if !settled {
            tracing::debug!(url, "Depop page never settled, continuing");
        }
        Ok(())
    }

    async fn structural(&self, page: &PageLease) -> MarketResult<Option<Vec<DepopItem>>> {
        let wait_for = format!("{}, {NO_RESULTS_SELECTOR}", self.config.card_selector);
        let appeared = page
            .wait_for_selector(&wait_for, CARD_WAIT_MS)
            .await
            .map_err(MarketError::Browser)?;
        if !appeared {
            tracing::debug!("Depop product grid never appeared");
        }

        let html = page.get_html().await.map_err(MarketError::Browser)?;
        let items = parse_cards(&html, &self.config.card_selector, &self.config.base_url)?;
        if !items.is_empty() {
            return Ok(Some(items));
        }
        if has_no_results_marker(&html) {
            return Ok(Some(Vec::new()));
        }
        Ok(None)
    }

    async fn run_search(&self, page: &mut PageLease, query: &Query) -> MarketResult<SearchPage> {
        let url = search_url(&self.config.base_url, query)?;

        // Must be attached before navigating or the response is missed.
        let capture = page
            .observe_json(&self.config.api_path_prefix)
            .await
            .map_err(MarketError::Browser)?;
        self.load(page, url.as_str()).await?;
        let mut intercepted = capture
            .wait(Duration::from_millis(self.config.grace_ms))
            .await;

        let limit = query.effective_limit();
        for strategy in STRATEGY_CHAIN {
            match strategy {
                Strategy::Intercepted => {
                    let Some(payload) = intercepted.take() else {
                        tracing::debug!("no Depop search payload within grace window");
                        continue;
                    };
                    match parse_api_payload(&payload, &self.config.base_url) {
                        Some((items, total)) => {
                            tracing::debug!(count = items.len(), "using intercepted Depop payload");
                            let listings = finish(items, limit, query.show_unavailable());
                            return Ok(SearchPage::new(listings).with_total(total));
                        }
                        None => tracing::debug!("intercepted Depop payload has no products"),
                    }
                }
                Strategy::Structural => {
                    if let Some(items) = self.structural(page).await? {
                        tracing::info!(count = items.len(), "Depop results scraped from page");
                        let listings = finish(items, limit, query.show_unavailable());
                        return Ok(SearchPage::new(listings));
                    }
                }
            }
        }

        Err(MarketError::ExtractionFailure(
            "neither intercepted payload nor product grid yielded results".to_string(),
        ))
    }

    async fn search_inner(&self, query: &Query) -> MarketResult<SearchPage> {
        let mut page = self.session.page().await?;
        let result = self.run_search(&mut page, query).await;
        page.release().await;
        result
    }

    async fn run_details(&self, page: &mut PageLease, slug: &str) -> MarketResult<ListingDetail> {
        let url = product_url(&self.config.base_url, slug);
        self.load(page, &url).await?;
        let html = page.get_html().await.map_err(MarketError::Browser)?;
        parse_detail_page(slug, url, &html)
    }
}

/// Merge JSON-LD product data with what the rendered page shows.
pub fn parse_detail_page(slug: &str, url: String, html: &str) -> MarketResult<ListingDetail> {
    let md = extract_page_metadata(html);
    let document = Html::parse_document(html);
    let mut detail = ListingDetail::new("depop", slug, url);

    if let Some(product) = &md.product {
        detail.title = product.name.clone();
        detail.description = product.description.clone();
        detail.condition = product.condition.clone();
        detail.seller = product.seller.clone();
        if let Some(price) = product.price {
            detail.set_price_text(format_price(price, product.price_currency.as_deref()));
        }
        detail.push_images(product.images.iter().cloned());
    } else if md.og.title.is_none() {
        return Err(MarketError::NotFound(format!("depop product {slug}")));
    }

    if detail.title.is_none() {
        detail.title = md.og.title.clone();
    }
    if detail.description.is_none() {
        detail.description = md
            .next_data_text("/props/pageProps/product/description")
            .or_else(|| first_text(&document, DESCRIPTION_SELECTOR))
            .or_else(|| md.og.description.clone());
    }
    if detail.seller.is_none() {
        detail.seller = md
            .next_data_text("/props/pageProps/product/seller/username")
            .or_else(|| SELLER_SELECTORS.iter().find_map(|s| first_text(&document, s)))
            .map(|s| s.trim_start_matches('@').to_string());
    }
    if detail.price_text.is_none() {
        if let Some(amount) = md.og.price_amount.as_deref() {
            let currency = md.og.price_currency.as_deref();
            match amount.parse::<f64>() {
                Ok(a) => detail.set_price_text(format_price(a, currency)),
                Err(_) => detail.set_price_text(amount),
            }
        }
    }
    detail.push_images(md.og.image.clone());
    Ok(detail)
}

#[async_trait]
impl Marketplace for DepopAdapter {
    fn info(&self) -> &MarketplaceInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Outcome {
        guarded_search(&self.info, self.config.deadline(), self.search_inner(query)).await
    }

    async fn listing_details(&self, id: &str) -> Result<ListingDetail, MarketError> {
        let fetch = async {
            let mut page = self.session.page().await?;
            let result = self.run_details(&mut page, id).await;
            page.release().await;
            result
        };
        tokio::time::timeout(self.config.deadline(), fetch)
            .await
            .map_err(|_| MarketError::Timeout(self.config.timeout_ms))?
    }

    async fn health_check(&self) -> bool {
        let reach = async {
            let mut page = self.session.page().await?;
            let result = page
                .navigate(&self.config.base_url, self.navigation_timeout_ms)
                .await
                .map_err(MarketError::Browser);
            page.release().await;
            result
        };
        match reach.await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Depop health check failed: {e}");
                false
            }
        }
    }
}
