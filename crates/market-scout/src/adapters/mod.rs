//! Marketplace adapters, one per access strategy.
//!
//! - [`ebay`]: official REST API with client-credentials OAuth
//! - [`facebook`]: undocumented GraphQL endpoint, no auth
//! - [`mercari`]: internal API called from inside a primed browser page
//! - [`depop`]: response interception with a page-scrape fallback

pub mod depop;
pub mod ebay;
pub mod facebook;
pub mod mercari;

pub use depop::DepopAdapter;
pub use ebay::EbayAdapter;
pub use facebook::FacebookAdapter;
pub use mercari::MercariAdapter;

use serde_json::Value;

/// Non-empty string at a JSON pointer.
pub(crate) fn json_text(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer)
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Number at a JSON pointer, accepting numeric strings.
pub(crate) fn json_number(v: &Value, pointer: &str) -> Option<f64> {
    v.pointer(pointer).and_then(|n| {
        n.as_f64()
            .or_else(|| n.as_str().and_then(|s| s.trim().replace(',', "").parse().ok()))
    })
}

pub(crate) fn json_bool(v: &Value, pointer: &str) -> Option<bool> {
    v.pointer(pointer).and_then(|b| b.as_bool())
}

/// Identifier at a JSON pointer, whether the provider sends it as a string
/// or a number.
pub(crate) fn json_id(v: &Value, pointer: &str) -> Option<String> {
    match v.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Format a price bound without a trailing `.0` for whole amounts.
pub(crate) fn format_bound(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        format!("{amount:.2}")
    }
}
