//! eBay Browse API adapter.
//!
//! The only adapter backed by an official API. A client-credentials token
//! is exchanged once and reused from the shared [`TokenCache`] until it is
//! within [`TOKEN_REFRESH_MARGIN`](crate::cache::TOKEN_REFRESH_MARGIN) of
//! expiry.

use super::{format_bound, json_number, json_text};
use crate::cache::{CachedToken, TokenCache};
use crate::config::EbayConfig;
use crate::error::{MarketError, MarketResult};
use crate::http_client::HttpClient;
use crate::marketplace::{
    format_price, guarded_search, Marketplace, MarketplaceInfo, MarketplaceKind, SearchPage,
};
use crate::model::{
    Condition, Listing, ListingDetail, LocationInfo, Outcome, Query, ShippingOption, SortOrder,
};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Largest page the Browse API returns.
pub const EBAY_PAGE_MAX: usize = 200;

const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

/// Provider condition ids for each normalized condition.
pub fn condition_ids(condition: Condition) -> &'static [u32] {
    match condition {
        Condition::New => &[1000],
        Condition::LikeNew => &[1500, 2750],
        Condition::Good => &[3000, 4000],
        Condition::Fair => &[5000, 6000],
        Condition::Poor => &[7000],
    }
}

fn sort_param(sort: SortOrder) -> Option<&'static str> {
    match sort {
        SortOrder::Relevance => None,
        SortOrder::Newest => Some("newlyListed"),
        SortOrder::PriceLowToHigh => Some("price"),
        SortOrder::PriceHighToLow => Some("-price"),
    }
}

/// Translate the query into Browse API `filter` syntax.
pub fn build_filter(query: &Query, currency: &str) -> Option<String> {
    let mut parts = Vec::new();

    if query.price_min().is_some() || query.price_max().is_some() {
        let min = query.price_min().map(format_bound).unwrap_or_default();
        let max = query.price_max().map(format_bound).unwrap_or_default();
        parts.push(format!("price:[{min}..{max}]"));
        parts.push(format!("priceCurrency:{currency}"));
    }

    if let Some(condition) = query.condition() {
        let ids: Vec<String> = condition_ids(condition)
            .iter()
            .map(|id| id.to_string())
            .collect();
        parts.push(format!("conditionIds:{{{}}}", ids.join("|")));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct EbayAdapter {
    info: MarketplaceInfo,
    config: EbayConfig,
    client_id: String,
    client_secret: String,
    http: HttpClient,
    tokens: Arc<TokenCache>,
}

impl EbayAdapter {
    /// Fails with a configuration error when credentials are missing.
    pub fn new(
        config: EbayConfig,
        http: HttpClient,
        tokens: Arc<TokenCache>,
    ) -> MarketResult<Self> {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let client_id = non_blank(&config.client_id)
            .ok_or_else(|| MarketError::Configuration("ebay.client_id is not set".to_string()))?;
        let client_secret = non_blank(&config.client_secret).ok_or_else(|| {
            MarketError::Configuration("ebay.client_secret is not set".to_string())
        })?;

        Ok(Self {
            info: MarketplaceInfo::new(MarketplaceKind::Ebay, true),
            config,
            client_id,
            client_secret,
            http,
            tokens,
        })
    }

    /// A bearer token, from cache unless it is about to expire.
    async fn access_token(&self) -> MarketResult<String> {
        if let Some(token) = self.tokens.fresh(&self.client_id) {
            return Ok(token);
        }
        let token = self.exchange_token().await?;
        let value = token.value.clone();
        self.tokens.store(&self.client_id, token);
        Ok(value)
    }

    async fn exchange_token(&self) -> MarketResult<CachedToken> {
        let url = format!("{}/identity/v1/oauth2/token", self.config.api_base);
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        let resp = self
            .http
            .post_form(
                &url,
                &[
                    ("grant_type".to_string(), "client_credentials".to_string()),
                    ("scope".to_string(), OAUTH_SCOPE.to_string()),
                ],
                &[("authorization".to_string(), format!("Basic {basic}"))],
            )
            .await?;

        if matches!(resp.status, 400 | 401 | 403) {
            let snippet: String = resp.body.chars().take(200).collect();
            return Err(MarketError::AuthFailure(format!(
                "token exchange rejected ({}): {snippet}",
                resp.status
            )));
        }
        let token: TokenResponse = resp.error_for_status()?.json()?;
        tracing::debug!(expires_in = token.expires_in, "obtained eBay access token");
        Ok(CachedToken::new(
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }

    async fn api_get(&self, url: &str) -> MarketResult<Value> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(
                url,
                &[
                    ("authorization".to_string(), format!("Bearer {token}")),
                    (
                        "x-ebay-c-marketplace-id".to_string(),
                        self.config.marketplace_id.clone(),
                    ),
                ],
            )
            .await?;

        match resp.status {
            401 => {
                self.tokens.invalidate(&self.client_id);
                Err(MarketError::AuthFailure(
                    "access token rejected by Browse API".to_string(),
                ))
            }
            404 => Err(MarketError::NotFound(url.to_string())),
            _ => resp.error_for_status()?.json(),
        }
    }

    fn search_url(&self, query: &Query) -> MarketResult<Url> {
        let mut url = Url::parse(&format!(
            "{}/buy/browse/v1/item_summary/search",
            self.config.api_base
        ))
        .map_err(|e| MarketError::Configuration(format!("invalid ebay.api_base: {e}")))?;

        let limit = query.effective_limit().min(EBAY_PAGE_MAX);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query.text());
            pairs.append_pair("limit", &limit.to_string());
            if let Some(filter) = build_filter(query, &self.config.currency) {
                pairs.append_pair("filter", &filter);
            }
            if let Some(sort) = sort_param(query.sort()) {
                pairs.append_pair("sort", sort);
            }
            if let Some(category) = query.category() {
                pairs.append_pair("category_ids", category);
            }
        }
        Ok(url)
    }

    async fn search_inner(&self, query: &Query) -> MarketResult<SearchPage> {
        let url = self.search_url(query)?;
        let body = self.api_get(url.as_str()).await?;
        parse_search_response(&body, query.effective_limit())
    }

    fn detail_url(&self, id: &str) -> MarketResult<Url> {
        let mut url = Url::parse(&format!("{}/buy/browse/v1/item", self.config.api_base))
            .map_err(|e| MarketError::Configuration(format!("invalid ebay.api_base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| MarketError::Configuration("ebay.api_base cannot be a base".to_string()))?
            .push(id);
        Ok(url)
    }
}

/// Parse a search response. Items that lack an id or title are skipped.
pub fn parse_search_response(body: &Value, limit: usize) -> MarketResult<SearchPage> {
    if !body.is_object() {
        return Err(MarketError::SchemaDrift(
            "search response is not an object".to_string(),
        ));
    }
    let total = body.get("total").and_then(|t| t.as_u64());
    let items = match body.get("itemSummaries") {
        Some(Value::Array(items)) => items.as_slice(),
        // The API omits the array entirely when nothing matched.
        None if total.is_some() => &[],
        _ => {
            return Err(MarketError::SchemaDrift(
                "search response has no itemSummaries".to_string(),
            ))
        }
    };

    let listings: Vec<Listing> = items
        .iter()
        .filter_map(|item| {
            let parsed = parse_item_summary(item);
            if parsed.is_none() {
                tracing::debug!("skipping eBay item without id/title");
            }
            parsed
        })
        .take(limit)
        .collect();

    Ok(SearchPage::new(listings).with_total(total))
}

fn price_text(v: &Value, pointer: &str) -> Option<String> {
    let amount = json_number(v, &format!("{pointer}/value"))?;
    let currency = json_text(v, &format!("{pointer}/currency"));
    Some(format_price(amount, currency.as_deref()))
}

fn parse_item_summary(item: &Value) -> Option<Listing> {
    let id = json_text(item, "/itemId")?;
    let title = json_text(item, "/title")?;
    let price = price_text(item, "/price")
        .or_else(|| price_text(item, "/currentBidPrice"))
        .unwrap_or_else(|| "See listing".to_string());

    let mut listing = Listing::new("ebay", id, title, price);
    listing.images = json_text(item, "/image/imageUrl")
        .into_iter()
        .chain(
            item.get("additionalImages")
                .and_then(|a| a.as_array())
                .into_iter()
                .flatten()
                .filter_map(|img| json_text(img, "/imageUrl")),
        )
        .collect();
    listing.condition = json_text(item, "/condition");
    listing.seller = json_text(item, "/seller/username");
    listing.url = json_text(item, "/itemWebUrl");
    listing.description = json_text(item, "/shortDescription");
    listing.location = item.get("itemLocation").and_then(|loc| {
        let parts: Vec<String> = ["/city", "/stateOrProvince", "/postalCode", "/country"]
            .iter()
            .filter_map(|p| json_text(loc, p))
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    });
    Some(listing)
}

/// Parse the per-item endpoint into a full detail record.
pub fn parse_item_detail(id: &str, v: &Value) -> MarketResult<ListingDetail> {
    if !v.is_object() {
        return Err(MarketError::SchemaDrift("item response is not an object".to_string()));
    }
    let url = json_text(v, "/itemWebUrl")
        .unwrap_or_else(|| format!("https://www.ebay.com/itm/{id}"));
    let item_id = json_text(v, "/itemId").unwrap_or_else(|| id.to_string());
    let mut detail = ListingDetail::new("ebay", item_id, url);

    detail.title = json_text(v, "/title");
    if let Some(price) = price_text(v, "/price") {
        detail.set_price_text(price);
    }
    detail.description = json_text(v, "/description").or_else(|| json_text(v, "/shortDescription"));
    detail.condition = json_text(v, "/condition");
    detail.seller = json_text(v, "/seller/username");

    detail.push_images(json_text(v, "/image/imageUrl"));
    detail.push_images(
        v.get("additionalImages")
            .and_then(|a| a.as_array())
            .into_iter()
            .flatten()
            .filter_map(|img| json_text(img, "/imageUrl")),
    );

    if let Some(loc) = v.get("itemLocation") {
        let mut info = LocationInfo {
            city: json_text(loc, "/city"),
            region: json_text(loc, "/stateOrProvince"),
            country: json_text(loc, "/country"),
            postal_code: json_text(loc, "/postalCode"),
            ..Default::default()
        };
        info.display = info.joined();
        detail.location = Some(info);
    }

    let options: Vec<ShippingOption> = v
        .get("shippingOptions")
        .and_then(|s| s.as_array())
        .into_iter()
        .flatten()
        .map(|opt| {
            let cost = json_number(opt, "/shippingCost/value");
            ShippingOption {
                service: json_text(opt, "/shippingServiceCode")
                    .or_else(|| json_text(opt, "/type"))
                    .unwrap_or_else(|| "Standard".to_string()),
                cost_text: price_text(opt, "/shippingCost"),
                cost,
            }
        })
        .collect();
    detail.shipping_offered = Some(!options.is_empty());
    detail.delivery_types = options.iter().map(|o| o.service.clone()).collect();
    detail.shipping_options = options;

    Ok(detail)
}

#[async_trait]
impl Marketplace for EbayAdapter {
    fn info(&self) -> &MarketplaceInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Outcome {
        guarded_search(&self.info, self.config.deadline(), self.search_inner(query)).await
    }

    async fn listing_details(&self, id: &str) -> Result<ListingDetail, MarketError> {
        let url = self.detail_url(id)?;
        let fetch = async {
            let body = self.api_get(url.as_str()).await?;
            parse_item_detail(id, &body)
        };
        tokio::time::timeout(self.config.deadline(), fetch)
            .await
            .map_err(|_| MarketError::Timeout(self.config.timeout_ms))?
    }

    async fn health_check(&self) -> bool {
        match self.access_token().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("eBay health check failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_filter_price_and_condition() {
        let q = Query::new("camera")
            .with_price_range(Some(10.0), Some(99.5))
            .with_condition(Condition::LikeNew);
        assert_eq!(
            build_filter(&q, "USD").as_deref(),
            Some("price:[10..99.50],priceCurrency:USD,conditionIds:{1500|2750}")
        );
    }

    #[test]
    fn test_build_filter_open_ended_price() {
        let q = Query::new("camera").with_price_range(None, Some(200.0));
        assert_eq!(
            build_filter(&q, "USD").as_deref(),
            Some("price:[..200],priceCurrency:USD")
        );
        assert_eq!(build_filter(&Query::new("camera"), "USD"), None);
    }

    #[test]
    fn test_new_requires_credentials() {
        let http = HttpClient::new(&Default::default());
        let tokens = Arc::new(TokenCache::default());
        let err = EbayAdapter::new(EbayConfig::default(), http.clone(), tokens.clone())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "configuration");

        let cfg = EbayConfig {
            client_id: Some("id".into()),
            client_secret: Some("   ".into()),
            ..Default::default()
        };
        assert!(EbayAdapter::new(cfg, http, tokens).is_err());
    }

    #[test]
    fn test_parse_search_skips_incomplete_items() {
        let body = json!({
            "total": 3,
            "itemSummaries": [
                {"itemId": "v1|1|0", "title": "Canon AE-1",
                 "price": {"value": "1234.50", "currency": "USD"},
                 "image": {"imageUrl": "https://i.ebayimg.com/1.jpg"}, "condition": "Used",
                 "seller": {"username": "camguy"},
                 "itemLocation": {"postalCode": "941**", "country": "US"},
                 "itemWebUrl": "https://www.ebay.com/itm/1"},
                {"itemId": "v1|2|0"},
                {"itemId": "v1|3|0", "title": "Lens cap"}
            ]
        });
        let page = parse_search_response(&body, 10).unwrap();
        assert_eq!(page.total_found, Some(3));
        assert_eq!(page.listings.len(), 2);

        let first = &page.listings[0];
        assert_eq!(first.price, Some(1234.5));
        assert_eq!(first.price_text, "$1234.50");
        assert_eq!(first.location.as_deref(), Some("941**, US"));
        assert_eq!(first.seller.as_deref(), Some("camguy"));

        let second = &page.listings[1];
        assert_eq!(second.price, None);
        assert_eq!(second.condition, None);
        assert_eq!(second.location, None);
        assert!(second.images.is_empty());
    }

    #[test]
    fn test_parse_search_empty_and_drift() {
        let page = parse_search_response(&json!({"total": 0}), 10).unwrap();
        assert!(page.listings.is_empty());

        let err = parse_search_response(&json!({"warnings": []}), 10).unwrap_err();
        assert_eq!(err.kind(), "schema_drift");
        assert!(parse_search_response(&json!([1, 2]), 10).is_err());
    }

    #[test]
    fn test_parse_item_detail() {
        let v = json!({
            "itemId": "v1|9|0",
            "title": "Road bike",
            "price": {"value": "450.00", "currency": "USD"},
            "description": "Full carbon",
            "image": {"imageUrl": "https://img/1.jpg"},
            "additionalImages": [
                {"imageUrl": "https://img/2.jpg"},
                {"imageUrl": "https://img/1.jpg"}
            ],
            "itemLocation": {"city": "Portland", "stateOrProvince": "OR", "country": "US"},
            "shippingOptions": [
                {"shippingServiceCode": "USPS Ground",
                 "shippingCost": {"value": "25.00", "currency": "USD"}},
                {"type": "LOCAL_PICKUP"}
            ],
            "seller": {"username": "pedals"}
        });
        let d = parse_item_detail("v1|9|0", &v).unwrap();
        assert_eq!(d.images, vec!["https://img/1.jpg", "https://img/2.jpg"]);
        assert_eq!(
            d.location.as_ref().and_then(|l| l.display.clone()).as_deref(),
            Some("Portland, OR, US")
        );
        assert_eq!(d.shipping_options.len(), 2);
        assert_eq!(d.shipping_options[0].cost, Some(25.0));
        assert_eq!(d.shipping_options[1].service, "LOCAL_PICKUP");
        assert_eq!(d.shipping_offered, Some(true));
        assert_eq!(d.price, Some(450.0));
        assert_eq!(d.url, "https://www.ebay.com/itm/v1|9|0");
    }
}
