use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::{IngestError, Result};

/// User agents to rotate through to avoid bot detection
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub enable_cookies: bool,
    pub enable_gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            enable_cookies: true,
            enable_gzip: true,
        }
    }
}

impl From<&FetchConfig> for HttpClientConfig {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            enable_cookies: cfg.enable_cookies,
            enable_gzip: cfg.enable_compression,
        }
    }
}

/// HTTP client with browser-like headers.
///
/// Each call is a single attempt; retrying is the fetcher's job. Responses are
/// classified so the caller can tell "retry later" from "nothing here".
pub struct EnhancedHttpClient {
    client: Client,
}

impl EnhancedHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static("application/json,text/html;q=0.9,*/*;q=0.8"),
        );
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(Self::random_user_agent())
            .cookie_store(config.enable_cookies)
            .gzip(config.enable_gzip)
            .brotli(config.enable_gzip)
            .default_headers(headers)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| IngestError::ResourceAcquisition {
                resource: "http client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Get a random user agent from the pool
    fn random_user_agent() -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }

    /// Statuses that mean "try again later" rather than "not here"
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            // Rate limiting
            429 |
            // Server errors
            500 | 502 | 503 | 504 |
            // Cloudflare errors
            520 | 521 | 522 | 523 | 524 | 525 | 526 | 527
        )
    }

    /// One GET returning a decoded JSON body.
    ///
    /// Transport failures and retryable statuses become `TransientNetwork`;
    /// any other non-success status becomes `NotFound`; an undecodable body
    /// becomes `MalformedRecord`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", Self::random_user_agent())
            .query(query)
            .send()
            .await
            .map_err(|e| IngestError::TransientNetwork(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if Self::is_retryable_status(status) {
            return Err(IngestError::TransientNetwork(format!("GET {} returned {}", url, status)));
        }
        if !status.is_success() {
            log::debug!("GET {} returned {}", url, status);
            return Err(IngestError::NotFound(format!("GET {} returned {}", url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::TransientNetwork(format!("reading body of {}: {}", url, e)))?;

        serde_json::from_str(&body).map_err(|e| IngestError::MalformedRecord {
            item: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = EnhancedHttpClient::new();
        assert!(client.is_ok());
    }

    #[test]
    fn test_random_user_agent() {
        let ua = EnhancedHttpClient::random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }

    #[test]
    fn test_retryable_status() {
        assert!(EnhancedHttpClient::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(EnhancedHttpClient::is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(EnhancedHttpClient::is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(EnhancedHttpClient::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(EnhancedHttpClient::is_retryable_status(StatusCode::from_u16(522).unwrap()));
        assert!(!EnhancedHttpClient::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!EnhancedHttpClient::is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_config_from_fetch_settings() {
        let fetch = FetchConfig { timeout_secs: 7, enable_cookies: false, ..FetchConfig::default() };
        let cfg = HttpClientConfig::from(&fetch);
        assert_eq!(cfg.timeout, Duration::from_secs(7));
        assert!(!cfg.enable_cookies);
    }
}
