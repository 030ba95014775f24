//! Error taxonomy shared by every marketplace adapter.

/// All errors an adapter can produce internally.
///
/// `search` never lets one of these escape; it is folded into a failed
/// [`Outcome`](crate::model::Outcome). Detail fetches and health checks
/// return them directly.
#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    /// Missing credential, missing browser executable, or invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure or a non-success response from the provider.
    #[error(
        "upstream unavailable{}: {message}",
        status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
    )]
    UpstreamUnavailable {
        status: Option<u16>,
        message: String,
    },

    /// The provider rejected the credential exchange.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The response no longer has the shape we parse.
    #[error("schema drift: {0}")]
    SchemaDrift(String),

    /// Free-text location could not be resolved to coordinates.
    #[error("location not recognized: {0}")]
    LocationUnresolved(String),

    /// Neither response interception nor page extraction produced data.
    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("listing not found: {0}")]
    NotFound(String),

    /// The per-call deadline elapsed.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The headless browser failed underneath a page operation.
    #[error("browser error: {0:#}")]
    Browser(#[source] anyhow::Error),
}

impl MarketError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        MarketError::UpstreamUnavailable {
            status,
            message: message.into(),
        }
    }

    /// Short stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Configuration(_) => "configuration",
            MarketError::UpstreamUnavailable { .. } => "upstream_unavailable",
            MarketError::AuthFailure(_) => "auth_failure",
            MarketError::SchemaDrift(_) => "schema_drift",
            MarketError::LocationUnresolved(_) => "location_unresolved",
            MarketError::ExtractionFailure(_) => "extraction_failure",
            MarketError::NotFound(_) => "not_found",
            MarketError::Timeout(_) => "timeout",
            MarketError::Browser(_) => "browser",
        }
    }
}

impl From<reqwest::Error> for MarketError {
    fn from(e: reqwest::Error) -> Self {
        MarketError::upstream(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(e: serde_json::Error) -> Self {
        MarketError::SchemaDrift(format!("invalid JSON payload: {e}"))
    }
}

pub type MarketResult<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display_includes_status() {
        let err = MarketError::upstream(Some(503), "service unavailable");
        assert_eq!(
            err.to_string(),
            "upstream unavailable (HTTP 503): service unavailable"
        );

        let err = MarketError::upstream(None, "connection reset");
        assert_eq!(err.to_string(), "upstream unavailable: connection reset");
    }

    #[test]
    fn test_json_error_maps_to_schema_drift() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{\"data\":").unwrap_err();
        let err: MarketError = parse_err.into();
        assert_eq!(err.kind(), "schema_drift");
    }

    #[test]
    fn test_browser_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("socket closed").context("failed to create new page");
        let err = MarketError::Browser(inner);
        let text = err.to_string();
        assert!(text.contains("failed to create new page"));
        assert!(text.contains("socket closed"));
    }
}
