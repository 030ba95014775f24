//! Facebook Marketplace adapter.
//!
//! Talks to the same GraphQL endpoint the web client uses. Queries are
//! identified by persisted `doc_id`s, which Facebook rotates from time to
//! time; they live in [`FacebookConfig`] so they can be updated without a
//! rebuild.

use super::{json_bool, json_id, json_number, json_text};
use crate::cache::{LocationCache, LocationCoordinates};
use crate::config::FacebookConfig;
use crate::error::{MarketError, MarketResult};
use crate::http_client::HttpClient;
use crate::marketplace::{
    format_price, guarded_search, title_marks_unavailable, Marketplace, MarketplaceInfo,
    MarketplaceKind, SearchPage,
};
use crate::model::{
    Condition, Listing, ListingDetail, LocationInfo, Outcome, Query, SortOrder, MAX_LIMIT,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Upper price bound meaning "no upper bound", in cents.
pub const PRICE_UNBOUNDED_CENTS: u64 = 214_748_364_700;

const SEARCH_QUERY_NAME: &str = "CometMarketplaceSearchContentPaginationQuery";
const LOCATION_QUERY_NAME: &str = "MarketplaceSearchAddressDataSourceQuery";
const PHOTOS_QUERY_NAME: &str = "MarketplacePDPC2CMediaViewerWithImagesQuery";
const DETAILS_QUERY_NAME: &str = "MarketplacePDPContainerQuery";

fn to_cents(amount: f64) -> u64 {
    (amount.max(0.0) * 100.0).round() as u64
}

fn condition_param(condition: Condition) -> &'static str {
    match condition {
        Condition::New => "new",
        Condition::LikeNew => "used_like_new",
        Condition::Good => "used_good",
        Condition::Fair | Condition::Poor => "used_fair",
    }
}

fn sort_param(sort: SortOrder) -> Option<&'static str> {
    match sort {
        SortOrder::Relevance => None,
        SortOrder::Newest => Some("CREATION_TIME_DESCEND"),
        SortOrder::PriceLowToHigh => Some("PRICE_ASCEND"),
        SortOrder::PriceHighToLow => Some("PRICE_DESCEND"),
    }
}

/// Variables for the listings query.
///
/// Twice the requested limit is asked for so that sold-item filtering still
/// leaves enough results.
pub fn search_variables(query: &Query, coords: &LocationCoordinates, radius_km: u32) -> Value {
    let lower = query.price_min().map(to_cents).unwrap_or(0);
    let upper = query
        .price_max()
        .map(to_cents)
        .unwrap_or(PRICE_UNBOUNDED_CENTS);
    let count = (query.effective_limit() * 2).min(MAX_LIMIT * 2);

    let mut browse = json!({
        "commerce_enable_local_pickup": true,
        "commerce_enable_shipping": true,
        "commerce_search_and_rp_available": true,
        "commerce_search_and_rp_condition": query.condition().map(condition_param),
        "filter_location_latitude": coords.latitude,
        "filter_location_longitude": coords.longitude,
        "filter_price_lower_bound": lower,
        "filter_price_upper_bound": upper,
        "filter_radius_km": radius_km,
    });
    if let Some(sort) = sort_param(query.sort()) {
        browse["commerce_search_sort_by"] = json!(sort);
    }
    if let Some(category) = query.category() {
        browse["commerce_search_and_rp_category_id"] = json!([category]);
    }

    json!({
        "count": count,
        "params": {
            "bqf": {"callsite": "COMMERCE_MKTPLACE_WWW", "query": query.text()},
            "browse_request_params": browse,
            "custom_request_params": {"surface": "SEARCH"},
        }
    })
}

/// Decode a GraphQL response body.
///
/// Bodies may carry the `for (;;);` anti-hijacking prefix and may stream
/// several JSON documents one per line; the first document is the answer.
pub fn parse_graphql_body(body: &str) -> MarketResult<Value> {
    let trimmed = body.trim_start();
    let trimmed = trimmed.strip_prefix("for (;;);").unwrap_or(trimmed);

    let value = serde_json::from_str::<Value>(trimmed)
        .ok()
        .or_else(|| {
            trimmed
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .find_map(|l| serde_json::from_str::<Value>(l).ok())
        })
        .ok_or_else(|| MarketError::SchemaDrift("GraphQL response is not JSON".to_string()))?;

    let has_data = value.get("data").is_some_and(|d| !d.is_null());
    if !has_data {
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            let message = errors
                .first()
                .and_then(|e| json_text(e, "/message"))
                .unwrap_or_else(|| "unknown GraphQL error".to_string());
            return Err(MarketError::upstream(None, message));
        }
    }
    Ok(value)
}

/// First location result that carries coordinates.
pub fn parse_location_results(body: &Value) -> Option<LocationCoordinates> {
    body.pointer("/data/city_street_search/street_results/edges")?
        .as_array()?
        .iter()
        .find_map(|edge| {
            let node = edge.get("node")?;
            Some(LocationCoordinates {
                latitude: json_number(node, "/location/latitude")?,
                longitude: json_number(node, "/location/longitude")?,
                display_name: json_text(node, "/single_line_address")
                    .or_else(|| json_text(node, "/subtitle_text"))
                    .unwrap_or_default(),
            })
        })
}

/// Whether a listing node is sold, pending, hidden or no longer live.
fn flagged_unavailable(listing: &Value) -> bool {
    ["/is_sold", "/is_pending", "/is_hidden"]
        .iter()
        .any(|p| json_bool(listing, p) == Some(true))
        || json_bool(listing, "/is_live") == Some(false)
}

fn parse_listing_node(listing: &Value, base_url: &str) -> Option<Listing> {
    let id = json_id(listing, "/id")?;
    let title = json_text(listing, "/marketplace_listing_title")?;
    let price = json_text(listing, "/listing_price/formatted_amount")
        .or_else(|| {
            json_number(listing, "/listing_price/amount")
                .map(|a| format_price(a, json_text(listing, "/listing_price/currency").as_deref()))
        })
        .unwrap_or_else(|| "See listing".to_string());

    let mut out = Listing::new("facebook", id.clone(), title, price);
    out.location = json_text(listing, "/location/reverse_geocode/city_page/display_name")
        .or_else(|| {
            let parts: Vec<String> = [
                "/location/reverse_geocode/city",
                "/location/reverse_geocode/state",
            ]
            .iter()
            .filter_map(|p| json_text(listing, p))
            .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        });
    out.images = json_text(listing, "/primary_listing_photo/image/uri")
        .into_iter()
        .collect();
    out.seller = json_text(listing, "/marketplace_listing_seller/name");
    out.description = json_text(listing, "/custom_sub_titles_with_rendering_flags/0/subtitle");
    out.url = Some(format!("{}/marketplace/item/{id}/", base_url.trim_end_matches('/')));
    Some(out)
}

/// Parse the listings query response, applying the sold filter and limit.
pub fn parse_search_response(
    body: &Value,
    base_url: &str,
    limit: usize,
    show_unavailable: bool,
) -> MarketResult<SearchPage> {
    let edges = body
        .pointer("/data/marketplace_search/feed_units/edges")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            MarketError::SchemaDrift("missing data.marketplace_search.feed_units.edges".to_string())
        })?;

    let mut hidden = 0usize;
    let listings: Vec<Listing> = edges
        .iter()
        .filter_map(|edge| edge.pointer("/node/listing"))
        .filter(|node| {
            if show_unavailable {
                return true;
            }
            let title = node
                .get("marketplace_listing_title")
                .and_then(|t| t.as_str())
                .unwrap_or("");
            let unavailable = flagged_unavailable(node) || title_marks_unavailable(title);
            if unavailable {
                hidden += 1;
            }
            !unavailable
        })
        .filter_map(|node| parse_listing_node(node, base_url))
        .take(limit)
        .collect();

    if hidden > 0 {
        tracing::debug!(hidden, "dropped sold or pending Facebook listings");
    }
    Ok(SearchPage::new(listings))
}

/// Fill a detail record from the details query target.
fn merge_details(detail: &mut ListingDetail, target: &Value) {
    detail.title = json_text(target, "/marketplace_listing_title");
    if let Some(price) = json_text(target, "/formatted_price/text") {
        detail.set_price_text(price);
    }
    detail.description = json_text(target, "/redacted_description/text");
    detail.seller = json_text(target, "/marketplace_listing_seller/name");
    detail.condition = json_text(target, "/condition");
    detail.delivery_types = target
        .get("delivery_types")
        .and_then(|d| d.as_array())
        .into_iter()
        .flatten()
        .filter_map(|d| d.as_str().map(String::from))
        .collect();
    detail.shipping_offered = json_bool(target, "/is_shipping_offered");

    let display = json_text(target, "/location_text/text");
    let latitude = json_number(target, "/location/latitude");
    let longitude = json_number(target, "/location/longitude");
    if display.is_some() || latitude.is_some() {
        let mut info = LocationInfo {
            display,
            latitude,
            longitude,
            ..Default::default()
        };
        if let Some(d) = info.display.as_deref() {
            let mut parts = d.split(',').map(str::trim);
            info.city = parts.next().filter(|s| !s.is_empty()).map(String::from);
            info.region = parts.next().filter(|s| !s.is_empty()).map(String::from);
        }
        detail.location = Some(info);
    }
}

fn photo_uris(target: &Value) -> Vec<String> {
    target
        .get("listing_photos")
        .and_then(|p| p.as_array())
        .into_iter()
        .flatten()
        .filter_map(|p| json_text(p, "/image/uri"))
        .collect()
}

fn detail_target(body: &Value) -> MarketResult<&Value> {
    body.pointer("/data/viewer/marketplace_product_details_page/target")
        .filter(|t| !t.is_null())
        .ok_or_else(|| {
            MarketError::NotFound("listing not present in product details page".to_string())
        })
}

pub struct FacebookAdapter {
    info: MarketplaceInfo,
    config: FacebookConfig,
    http: HttpClient,
    locations: Arc<LocationCache>,
}

impl FacebookAdapter {
    pub fn new(config: FacebookConfig, http: HttpClient, locations: Arc<LocationCache>) -> Self {
        Self {
            info: MarketplaceInfo::new(MarketplaceKind::Facebook, false),
            config,
            http,
            locations,
        }
    }

    async fn graphql(
        &self,
        friendly_name: &str,
        doc_id: &str,
        variables: &Value,
    ) -> MarketResult<Value> {
        let form = [
            ("doc_id".to_string(), doc_id.to_string()),
            ("variables".to_string(), variables.to_string()),
            ("fb_api_req_friendly_name".to_string(), friendly_name.to_string()),
            ("fb_api_caller_class".to_string(), "RelayModern".to_string()),
            ("server_timestamps".to_string(), "true".to_string()),
        ];
        let headers = [
            ("x-fb-friendly-name".to_string(), friendly_name.to_string()),
            ("origin".to_string(), self.config.base_url.clone()),
            (
                "referer".to_string(),
                format!("{}/marketplace/", self.config.base_url),
            ),
        ];

        tracing::debug!(query = friendly_name, "Facebook GraphQL request");
        let resp = self
            .http
            .post_form(&self.config.graphql_url, &form, &headers)
            .await?
            .error_for_status()?;
        parse_graphql_body(&resp.body)
    }

    /// Resolve free text to coordinates, consulting the cache first.
    pub async fn resolve_location(&self, text: &str) -> MarketResult<LocationCoordinates> {
        if let Some(hit) = self.locations.get(text) {
            return Ok(hit);
        }

        let variables = json!({
            "params": {
                "caller": "MARKETPLACE",
                "country_filter": null,
                "page_category": ["CITY", "SUBCITY", "NEIGHBORHOOD", "POSTAL_CODE"],
                "query": text.trim(),
                "search_type": "PLACE_TYPEAHEAD",
            }
        });
        let body = self
            .graphql(LOCATION_QUERY_NAME, &self.config.location_doc_id, &variables)
            .await?;
        let coords = parse_location_results(&body)
            .ok_or_else(|| MarketError::LocationUnresolved(text.trim().to_string()))?;

        tracing::debug!(
            location = text,
            resolved = %coords.display_name,
            "resolved marketplace location"
        );
        self.locations.insert(text, coords.clone());
        Ok(coords)
    }

    async fn search_inner(&self, query: &Query) -> MarketResult<SearchPage> {
        let location = query
            .location()
            .unwrap_or(self.config.default_location.as_str());
        let coords = self.resolve_location(location).await?;

        let variables = search_variables(query, &coords, self.config.radius_km);
        let body = self
            .graphql(SEARCH_QUERY_NAME, &self.config.search_doc_id, &variables)
            .await?;
        parse_search_response(
            &body,
            &self.config.base_url,
            query.effective_limit(),
            query.show_unavailable(),
        )
    }

    async fn details_inner(&self, id: &str) -> MarketResult<ListingDetail> {
        let photo_vars = json!({"targetId": id});
        let detail_vars = json!({"targetId": id, "scale": 1});

        let (photos, details) = tokio::join!(
            self.graphql(PHOTOS_QUERY_NAME, &self.config.listing_photos_doc_id, &photo_vars),
            self.graphql(DETAILS_QUERY_NAME, &self.config.listing_details_doc_id, &detail_vars),
        );

        let url = format!(
            "{}/marketplace/item/{id}/",
            self.config.base_url.trim_end_matches('/')
        );
        let mut detail = ListingDetail::new("facebook", id, url);

        let details = details.and_then(|body| detail_target(&body).cloned());
        let photos = photos.and_then(|body| detail_target(&body).map(photo_uris));

        match (details, photos) {
            (Ok(target), Ok(images)) => {
                merge_details(&mut detail, &target);
                detail.push_images(images);
                detail.push_images(photo_uris(&target));
            }
            (Ok(target), Err(e)) => {
                tracing::warn!(id, "Facebook photo query failed, returning details only: {e}");
                merge_details(&mut detail, &target);
                detail.push_images(photo_uris(&target));
            }
            (Err(e), Ok(images)) => {
                tracing::warn!(id, "Facebook details query failed, returning photos only: {e}");
                detail.push_images(images);
            }
            (Err(e), Err(_)) => return Err(e),
        }
        Ok(detail)
    }
}

#[async_trait]
impl Marketplace for FacebookAdapter {
    fn info(&self) -> &MarketplaceInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Outcome {
        guarded_search(&self.info, self.config.deadline(), self.search_inner(query)).await
    }

    async fn listing_details(&self, id: &str) -> Result<ListingDetail, MarketError> {
        tokio::time::timeout(self.config.deadline(), self.details_inner(id))
            .await
            .map_err(|_| MarketError::Timeout(self.config.timeout_ms))?
    }

    async fn health_check(&self) -> bool {
        match self.http.get(&self.config.base_url, &[]).await {
            Ok(resp) => resp.status < 500,
            Err(e) => {
                tracing::warn!("Facebook health check failed: {e}");
                false
            }
        }
    }
}
