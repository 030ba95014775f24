//! Async HTTP client wrapping reqwest.
//!
//! Used by the adapters that talk to their provider directly (REST and
//! GraphQL) and for cheap reachability checks. Handles timeouts, retry on
//! 5xx, and backoff on 429.

use crate::config::HttpConfig;
use crate::error::MarketError;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Response from an HTTP request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Response headers (selected subset).
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Turn a non-2xx response into `UpstreamUnavailable`.
    pub fn error_for_status(self) -> Result<Self, MarketError> {
        if self.is_success() {
            Ok(self)
        } else {
            let snippet: String = self.body.chars().take(200).collect();
            Err(MarketError::upstream(
                Some(self.status),
                format!("{} returned {}: {snippet}", self.url, self.status),
            ))
        }
    }

    /// Decode the body as JSON. A body that does not decode is schema drift.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MarketError> {
        serde_json::from_str(&self.body).map_err(|e| {
            MarketError::SchemaDrift(format!("unexpected response from {}: {e}", self.url))
        })
    }
}

/// HTTP client shared by the direct-access adapters.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for edges that reject HTTP/2.
    h1_client: reqwest::Client,
    timeout_ms: u64,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .http1_only()
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
        }
    }

    /// GET with extra headers, retry on 5xx and backoff on 429.
    ///
    /// Falls back to HTTP/1.1 on protocol errors.
    pub async fn get(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
    ) -> Result<HttpResponse, MarketError> {
        let build = |client: &reqwest::Client| {
            let mut builder = client.get(url);
            for (name, value) in extra_headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder
        };

        match self.send_with_retry(url, build(&self.client)).await {
            Ok(resp) => Ok(resp),
            Err(e) if looks_like_protocol_error(&e) => {
                tracing::debug!("retrying {url} over HTTP/1.1: {e}");
                self.send_with_retry(url, build(&self.h1_client)).await
            }
            Err(e) => Err(e),
        }
    }

    /// POST url-encoded form data.
    pub async fn post_form(
        &self,
        url: &str,
        form_fields: &[(String, String)],
        extra_headers: &[(String, String)],
    ) -> Result<HttpResponse, MarketError> {
        let mut builder = self.client.post(url);
        for (name, value) in extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.form(form_fields);
        self.send_with_retry(url, builder).await
    }

    async fn send_with_retry(
        &self,
        url: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<HttpResponse, MarketError> {
        let builder = builder.timeout(Duration::from_millis(self.timeout_ms));
        let mut retries = 0u32;

        loop {
            let attempt = builder
                .try_clone()
                .ok_or_else(|| MarketError::upstream(None, "request body is not retryable"))?;

            match attempt.send().await {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < self.max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tracing::debug!("{url} returned {status}, retry {retries} in {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == 429 && retries < self.max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        let delay = Duration::from_secs(retry_after.min(10));
                        tracing::debug!("{url} rate limited, backing off {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let final_url = r.url().to_string();
                    let headers: Vec<(String, String)> = r
                        .headers()
                        .iter()
                        .filter(|(k, _)| {
                            matches!(
                                k.as_str(),
                                "content-type" | "set-cookie" | "retry-after" | "location"
                            )
                        })
                        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                        .collect();
                    let body = r.text().await?;

                    return Ok(HttpResponse {
                        url: url.to_string(),
                        final_url,
                        status,
                        headers,
                        body,
                    });
                }
                Err(e) => {
                    if retries < self.max_retries && !e.is_builder() {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

fn looks_like_protocol_error(e: &MarketError) -> bool {
    match e {
        MarketError::UpstreamUnavailable { status: None, message } => {
            message.contains("http2")
                || message.contains("protocol")
                || message.contains("connection closed")
        }
        _ => false,
    }
}
