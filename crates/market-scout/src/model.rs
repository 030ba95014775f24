//! Normalized listing model shared by every marketplace adapter.
//!
//! Adapters translate their provider's native payloads into these shapes.
//! Every `Listing` and `Outcome` is built fresh per call and owned by the
//! caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of listings requested when the caller gives no limit.
pub const DEFAULT_LIMIT: usize = 20;

/// Largest limit any adapter will honor for one query.
pub const MAX_LIMIT: usize = 100;

/// Item condition, normalized across marketplaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::LikeNew => "like_new",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Poor => "poor",
        }
    }

    /// Lenient mapping from the free-form labels providers return.
    pub fn from_label(label: &str) -> Option<Self> {
        let norm: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match norm.as_str() {
            "new" | "brand_new" | "new_with_tags" | "nwt" | "new_other" => Some(Condition::New),
            "like_new" | "open_box" | "used_like_new" | "excellent" | "used_excellent" => {
                Some(Condition::LikeNew)
            }
            "good" | "used" | "used_good" | "very_good" | "pre_owned" => Some(Condition::Good),
            "fair" | "used_fair" | "acceptable" => Some(Condition::Fair),
            "poor" | "for_parts" | "for_parts_or_not_working" | "damaged" => {
                Some(Condition::Poor)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::from_label(s).ok_or_else(|| format!("unknown condition: {s}"))
    }
}

/// Result ordering requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    Newest,
    PriceLowToHigh,
    PriceHighToLow,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "relevance" | "best_match" => Ok(SortOrder::Relevance),
            "newest" | "newly_listed" | "recent" => Ok(SortOrder::Newest),
            "price_low_to_high" | "price_asc" | "price_low" => Ok(SortOrder::PriceLowToHigh),
            "price_high_to_low" | "price_desc" | "price_high" => Ok(SortOrder::PriceHighToLow),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// One search request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    text: String,
    location: Option<String>,
    price_min: Option<f64>,
    price_max: Option<f64>,
    limit: usize,
    condition: Option<Condition>,
    sort: Option<SortOrder>,
    category: Option<String>,
    sizes: Vec<String>,
    colors: Vec<String>,
    show_unavailable: bool,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
            price_min: None,
            price_max: None,
            limit: DEFAULT_LIMIT,
            condition: None,
            sort: None,
            category: None,
            sizes: Vec::new(),
            colors: Vec::new(),
            show_unavailable: false,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_price_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.price_min = min;
        self.price_max = max;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_sizes<I, S>(mut self, sizes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sizes = sizes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_colors<I, S>(mut self, colors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.colors = colors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_show_unavailable(mut self, show: bool) -> Self {
        self.show_unavailable = show;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref().filter(|l| !l.trim().is_empty())
    }

    pub fn price_min(&self) -> Option<f64> {
        self.price_min
    }

    pub fn price_max(&self) -> Option<f64> {
        self.price_max
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Requested limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT)
    }

    pub fn condition(&self) -> Option<Condition> {
        self.condition
    }

    pub fn sort(&self) -> SortOrder {
        self.sort.unwrap_or_default()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn sizes(&self) -> &[String] {
        &self.sizes
    }

    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    pub fn show_unavailable(&self) -> bool {
        self.show_unavailable
    }
}

/// A single for-sale item, normalized.
///
/// Ids are only unique inside one marketplace; use [`Listing::key`] when
/// merging results from several adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub title: String,
    /// Price exactly as the provider formatted it.
    pub price_text: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub seller: Option<String>,
    pub condition: Option<String>,
    pub marketplace: String,
    pub url: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Listing {
    /// Start a listing with the required fields; price text is parsed here.
    pub fn new(
        marketplace: &str,
        id: impl Into<String>,
        title: impl Into<String>,
        price_text: impl Into<String>,
    ) -> Self {
        let price_text = price_text.into();
        let parsed = crate::marketplace::parse_price(&price_text);
        Self {
            id: id.into(),
            title: title.into(),
            price_text,
            price: parsed.amount,
            currency: parsed.currency,
            location: None,
            description: None,
            images: Vec::new(),
            seller: None,
            condition: None,
            marketplace: marketplace.to_string(),
            url: None,
            captured_at: Utc::now(),
        }
    }

    /// Identity across marketplaces.
    pub fn key(&self) -> (&str, &str) {
        (&self.marketplace, &self.id)
    }
}

/// Structured location attached to a listing detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    /// Human-readable summary, e.g. "Austin, TX, US".
    pub display: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationInfo {
    /// Join the non-empty parts as "city, region, country".
    pub fn joined(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOption {
    pub service: String,
    pub cost_text: Option<String>,
    pub cost: Option<f64>,
}

/// Full record for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDetail {
    pub id: String,
    pub marketplace: String,
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub location: Option<LocationInfo>,
    pub seller: Option<String>,
    pub condition: Option<String>,
    pub delivery_types: Vec<String>,
    pub shipping_offered: Option<bool>,
    pub shipping_options: Vec<ShippingOption>,
    pub url: String,
}

impl ListingDetail {
    pub fn new(marketplace: &str, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            marketplace: marketplace.to_string(),
            title: None,
            price_text: None,
            price: None,
            currency: None,
            description: None,
            images: Vec::new(),
            location: None,
            seller: None,
            condition: None,
            delivery_types: Vec::new(),
            shipping_offered: None,
            shipping_options: Vec::new(),
            url: url.into(),
        }
    }

    /// Set the formatted price and its parsed parts together.
    pub fn set_price_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        let parsed = crate::marketplace::parse_price(&text);
        self.price = parsed.amount;
        self.currency = parsed.currency;
        self.price_text = Some(text);
    }

    /// Append images, skipping blanks and duplicates while keeping order.
    pub fn push_images<I>(&mut self, images: I)
    where
        I: IntoIterator<Item = String>,
    {
        for img in images {
            if !img.trim().is_empty() && !self.images.contains(&img) {
                self.images.push(img);
            }
        }
    }
}

/// Per-marketplace search result.
///
/// Construct through [`Outcome::ok`] or [`Outcome::failed`]; a failed
/// outcome never carries listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    marketplace: String,
    success: bool,
    listings: Vec<Listing>,
    error: Option<String>,
    total_found: Option<u64>,
}

impl Outcome {
    pub fn ok(marketplace: &str, listings: Vec<Listing>, total_found: Option<u64>) -> Self {
        Self {
            marketplace: marketplace.to_string(),
            success: true,
            listings,
            error: None,
            total_found,
        }
    }

    pub fn failed(marketplace: &str, error: impl Into<String>) -> Self {
        Self {
            marketplace: marketplace.to_string(),
            success: false,
            listings: Vec::new(),
            error: Some(error.into()),
            total_found: None,
        }
    }

    pub fn marketplace(&self) -> &str {
        &self.marketplace
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }

    pub fn into_listings(self) -> Vec<Listing> {
        self.listings
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn total_found(&self) -> Option<u64> {
        self.total_found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_from_label() {
        assert_eq!(Condition::from_label("Like New"), Some(Condition::LikeNew));
        assert_eq!(Condition::from_label("brand_new"), Some(Condition::New));
        assert_eq!(Condition::from_label("used"), Some(Condition::Good));
        assert_eq!(Condition::from_label("For parts"), Some(Condition::Poor));
        assert_eq!(Condition::from_label("mint-ish"), None);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("newest".parse::<SortOrder>(), Ok(SortOrder::Newest));
        assert_eq!(
            "price-high-to-low".parse::<SortOrder>(),
            Ok(SortOrder::PriceHighToLow)
        );
        assert!("cheapest-first-please".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_query_effective_limit_clamps() {
        assert_eq!(Query::new("lamp").with_limit(0).effective_limit(), 1);
        assert_eq!(Query::new("lamp").with_limit(5000).effective_limit(), MAX_LIMIT);
        assert_eq!(Query::new("lamp").effective_limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_query_blank_location_is_none() {
        let q = Query::new("desk").with_location("   ");
        assert_eq!(q.location(), None);
    }

    #[test]
    fn test_failed_outcome_has_no_listings() {
        let out = Outcome::failed("ebay", "boom");
        assert!(!out.success());
        assert!(out.listings().is_empty());
        assert_eq!(out.error(), Some("boom"));
    }

    #[test]
    fn test_listing_new_parses_price() {
        let l = Listing::new("facebook", "42", "Road bike", "$1,200");
        assert_eq!(l.price, Some(1200.0));
        assert_eq!(l.currency.as_deref(), Some("$"));
        assert_eq!(l.key(), ("facebook", "42"));
    }

    #[test]
    fn test_location_joined_skips_missing_parts() {
        let loc = LocationInfo {
            city: Some("Austin".into()),
            region: None,
            country: Some("US".into()),
            ..Default::default()
        };
        assert_eq!(loc.joined().as_deref(), Some("Austin, US"));
        assert_eq!(LocationInfo::default().joined(), None);
    }

    #[test]
    fn test_push_images_dedupes() {
        let mut d = ListingDetail::new("depop", "x", "https://example.com/x");
        d.push_images(vec!["a".to_string(), "".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(d.images, vec!["a", "b"]);
    }
}
