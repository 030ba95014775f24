//! Mercari adapter.
//!
//! Mercari's internal API rejects requests that don't come from a primed
//! browser session, so every call goes through a real page: load the front
//! page, let its anti-bot scripts settle, then call the API with the page's
//! own `fetch` so cookies and client hints are inherited.

use super::{json_id, json_number, json_text};
use crate::config::MercariConfig;
use crate::error::{MarketError, MarketResult};
use crate::marketplace::{
    format_price, guarded_search, Marketplace, MarketplaceInfo, MarketplaceKind, SearchPage,
};
use crate::model::{Condition, Listing, ListingDetail, Outcome, Query, ShippingOption, SortOrder};
use crate::renderer::{BrowserSession, PageLease, PageRequest};
use crate::structured::{extract_page_metadata, PageMetadata};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 25_000;
const SETTLE_TIMEOUT_MS: u64 = 10_000;

fn condition_id(condition: Condition) -> u32 {
    match condition {
        Condition::New => 1,
        Condition::LikeNew => 2,
        Condition::Good => 3,
        Condition::Fair => 4,
        Condition::Poor => 5,
    }
}

fn sort_id(sort: SortOrder) -> u32 {
    match sort {
        SortOrder::Relevance => 0,
        SortOrder::Newest => 2,
        SortOrder::PriceLowToHigh => 3,
        SortOrder::PriceHighToLow => 4,
    }
}

/// Request body for the internal `searchQuery` operation.
pub fn search_request_body(query: &Query) -> Value {
    let conditions: Vec<u32> = query.condition().map(condition_id).into_iter().collect();
    // 1 = on sale, 2 = sold out
    let statuses: Vec<u32> = if query.show_unavailable() { vec![1, 2] } else { vec![1] };
    let mut criteria = json!({
        "query": query.text(),
        "offset": 0,
        "length": query.effective_limit(),
        "sortBy": sort_id(query.sort()),
        "itemConditions": conditions,
        "itemStatuses": statuses,
        "deliveryType": "all",
        "facets": [1, 2, 3, 4],
    });
    if let Some(min) = query.price_min() {
        criteria["minPrice"] = json!((min * 100.0).round() as u64);
    }
    if let Some(max) = query.price_max() {
        criteria["maxPrice"] = json!((max * 100.0).round() as u64);
    }
    if let Some(category) = query.category() {
        criteria["categoryIds"] = json!([category]);
    }

    json!({
        "operationName": "searchQuery",
        "variables": {"criteria": criteria},
    })
}

fn item_url(base_url: &str, id: &str) -> String {
    format!("{}/us/item/{id}/", base_url.trim_end_matches('/'))
}

/// Price fields are integer cents.
fn cents_text(v: &Value, pointer: &str) -> Option<String> {
    json_number(v, pointer).map(|cents| format_price(cents / 100.0, Some("USD")))
}

fn parse_item(item: &Value, base_url: &str) -> Option<Listing> {
    let id = json_id(item, "/id")?;
    let title = json_text(item, "/name")?;
    let price = cents_text(item, "/price").unwrap_or_else(|| "See listing".to_string());

    let mut listing = Listing::new("mercari", id.clone(), title, price);
    listing.images = item
        .get("photos")
        .and_then(|p| p.as_array())
        .into_iter()
        .flatten()
        .filter_map(|p| json_text(p, "/imageUrl").or_else(|| json_text(p, "/thumbnail")))
        .collect();
    listing.condition = json_text(item, "/itemCondition/name");
    listing.seller = json_text(item, "/seller/name");
    listing.description = json_text(item, "/description");
    listing.url = Some(item_url(base_url, &id));
    Some(listing)
}

/// Parse a `searchQuery` response.
pub fn parse_search_response(
    body: &Value,
    base_url: &str,
    limit: usize,
    show_unavailable: bool,
) -> MarketResult<SearchPage> {
    let search = body
        .pointer("/data/search")
        .filter(|s| s.is_object())
        .ok_or_else(|| MarketError::SchemaDrift("missing data.search".to_string()))?;

    let listings: Vec<Listing> = search
        .get("itemsList")
        .and_then(|i| i.as_array())
        .into_iter()
        .flatten()
        .filter(|item| {
            show_unavailable
                || item.get("status").and_then(|s| s.as_str()).unwrap_or("on_sale") == "on_sale"
        })
        .filter_map(|item| parse_item(item, base_url))
        .take(limit)
        .collect();

    let total = search.get("count").and_then(|c| c.as_u64());
    Ok(SearchPage::new(listings).with_total(total))
}

fn seller_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:@|\bby\s+)([A-Za-z0-9][A-Za-z0-9_.-]{1,39})")
            .expect("seller regex is valid")
    })
}

/// Recover a seller handle from free-form meta text.
pub fn seller_from_text(text: &str) -> Option<String> {
    seller_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', '-']).to_string())
}

/// Seller handle from the page's Next.js payload or its meta text.
pub fn seller_from_metadata(md: &PageMetadata) -> Option<String> {
    md.next_data_text("/props/pageProps/item/seller/name")
        .or_else(|| md.og.description.as_deref().and_then(seller_from_text))
        .or_else(|| {
            ["twitter:data1", "twitter:description", "description"]
                .iter()
                .filter_map(|name| md.meta_content(name))
                .find_map(seller_from_text)
        })
}

/// Build a detail record from an item page's structured data.
pub fn detail_from_metadata(id: &str, url: String, md: &PageMetadata) -> ListingDetail {
    let mut detail = ListingDetail::new("mercari", id, url);

    if let Some(product) = &md.product {
        detail.title = product.name.clone();
        detail.description = product.description.clone();
        detail.condition = product.condition.clone();
        detail.seller = product.seller.clone();
        if let Some(price) = product.price {
            detail.set_price_text(format_price(price, product.price_currency.as_deref()));
        }
        detail.push_images(product.images.iter().cloned());
    }

    if detail.title.is_none() {
        detail.title = md.og.title.clone();
    }
    if detail.description.is_none() {
        detail.description = md
            .next_data_text("/props/pageProps/item/description")
            .or_else(|| md.og.description.clone());
    }
    detail.push_images(md.og.image.clone());
    detail
}

/// Fill seller and shipping from an `itemQuery` response.
fn merge_item_query(detail: &mut ListingDetail, body: &Value) {
    let Some(item) = body.pointer("/data/item") else {
        return;
    };
    if detail.seller.is_none() {
        detail.seller = json_text(item, "/seller/name");
    }
    if detail.condition.is_none() {
        detail.condition = json_text(item, "/itemCondition/name");
    }

    let shipping = item
        .get("shippingClasses")
        .or_else(|| item.get("shippingClass"));
    let classes: Vec<&Value> = match shipping {
        Some(Value::Array(arr)) => arr.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    };
    for class in classes {
        let service = json_text(class, "/carrierDisplayName")
            .or_else(|| json_text(class, "/name"))
            .unwrap_or_else(|| "Standard".to_string());
        let cost = json_number(class, "/fee").map(|c| c / 100.0);
        detail.shipping_options.push(ShippingOption {
            service,
            cost_text: cost.map(|c| format_price(c, Some("USD"))),
            cost,
        });
    }
    if !detail.shipping_options.is_empty() {
        detail.shipping_offered = Some(true);
        detail.delivery_types = vec!["SHIPPING".to_string()];
    }
}

pub struct MercariAdapter {
    info: MarketplaceInfo,
    config: MercariConfig,
    session: Arc<BrowserSession>,
    navigation_timeout_ms: u64,
}

impl MercariAdapter {
    pub fn new(config: MercariConfig, session: Arc<BrowserSession>) -> Self {
        Self {
            info: MarketplaceInfo::new(MarketplaceKind::Mercari, false),
            config,
            session,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }

    pub fn with_navigation_timeout(mut self, timeout_ms: u64) -> Self {
        self.navigation_timeout_ms = timeout_ms;
        self
    }

    /// Navigate and wait for the page's own requests to quiet down.
    async fn prime(&self, page: &mut PageLease, url: &str) -> MarketResult<()> {
        let nav = page
            .navigate(url, self.navigation_timeout_ms)
            .await
            .map_err(MarketError::Browser)?;
        let settled = page
            .wait_for_network_idle(self.config.settle_ms, SETTLE_TIMEOUT_MS)
            .await
            .map_err(MarketError::Browser)?;
        if !settled {
            tracing::debug!(url = %nav.final_url, "page never settled, continuing");
        }
        Ok(())
    }

    /// Call the internal API from inside the page.
    async fn api_call(&self, page: &PageLease, body: &Value) -> MarketResult<Value> {
        let request = PageRequest::post_json(&self.config.api_url, body)
            .header("x-platform", "web")
            .header("accept", "application/json");
        let resp = page.fetch(&request).await.map_err(MarketError::Browser)?;
        if !(200..300).contains(&resp.status) {
            let snippet: String = resp.body.chars().take(200).collect();
            return Err(MarketError::upstream(Some(resp.status), snippet));
        }
        Ok(serde_json::from_str(&resp.body)?)
    }

    async fn run_search(&self, page: &mut PageLease, query: &Query) -> MarketResult<SearchPage> {
        self.prime(page, &format!("{}/", self.config.base_url.trim_end_matches('/')))
            .await?;
        let body = self.api_call(page, &search_request_body(query)).await?;
        parse_search_response(
            &body,
            &self.config.base_url,
            query.effective_limit(),
            query.show_unavailable(),
        )
    }

    async fn search_inner(&self, query: &Query) -> MarketResult<SearchPage> {
        let mut page = self.session.page().await?;
        let result = self.run_search(&mut page, query).await;
        page.release().await;
        result
    }

    async fn run_details(&self, page: &mut PageLease, id: &str) -> MarketResult<ListingDetail> {
        let url = item_url(&self.config.base_url, id);
        self.prime(page, &url).await?;

        let html = page.get_html().await.map_err(MarketError::Browser)?;
        let md = extract_page_metadata(&html);
        if md.product.is_none() && md.og.title.is_none() {
            return Err(MarketError::NotFound(format!("mercari item {id}")));
        }
        let mut detail = detail_from_metadata(id, url, &md);

        let item_query = json!({"operationName": "itemQuery", "variables": {"id": id}});
        match self.api_call(page, &item_query).await {
            Ok(body) => merge_item_query(&mut detail, &body),
            Err(e) => tracing::warn!(id, "Mercari itemQuery failed, using page data only: {e}"),
        }

        if detail.seller.is_none() {
            detail.seller = seller_from_metadata(&md);
        }
        Ok(detail)
    }
}

#[async_trait]
impl Marketplace for MercariAdapter {
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
                tracing::warn!("Mercari health check failed: {e}");
                false
            }
        }
    }
}
