use super::util::send_with_retry;
use crate::core::{AccountQuota, AddressQuota, CryptoCurrency, LimitsProvider};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, error, instrument};

const API_KEY_HEADER: &str = "X-FAST-ApiKey";

/// Quota service client.
pub struct FastspotLimitsProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl FastspotLimitsProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("swap-limits/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!("Requesting limits from {}", url);
        send_with_retry(
            || {
                let mut request = self.client.get(url);
                if let Some(key) = &self.api_key {
                    request = request.header(API_KEY_HEADER, key);
                }
                request.send()
            },
            2,
            300,
        )
        .await
        .with_context(|| format!("Limits request failed: {url}"))
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("HTTP error: {} for {}", status, what));
    }
    let text = response
        .text()
        .await
        .context("Failed to get response text")?;
    serde_json::from_str(&text).map_err(|e| {
        error!(error = ?e, response = %text, "Failed to parse limits response");
        anyhow!("Failed to parse limits response for {}: {}", what, e)
    })
}

#[async_trait]
impl LimitsProvider for FastspotLimitsProvider {
    #[instrument(name = "FastspotAddressLimits", skip(self))]
    async fn get_limits(&self, asset: CryptoCurrency, address: &str) -> Result<AddressQuota> {
        let url = format!("{}/limits/{}/{}", self.base_url, asset.ticker(), address);
        let response = self.get(&url).await?;
        parse_json(response, &format!("{asset} address {address}")).await
    }

    #[instrument(name = "FastspotUserLimits", skip(self))]
    async fn get_user_limits(&self, account_id: &str) -> Result<Option<AccountQuota>> {
        let url = format!("{}/limits/user/{}", self.base_url, account_id);
        let response = self.get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No linked identity for account");
            return Ok(None);
        }
        parse_json(response, &format!("account {account_id}"))
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ADDRESS_LIMITS: &str = r#"{
        "monthly": 10000000,
        "current": 2500000,
        "monthlyRemaining": 7500000,
        "reference": {"monthly": 20000, "current": 5000, "monthlyRemaining": 15000}
    }"#;

    async fn create_mock_server(request_path: &str, status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;

        mock_server
    }

    #[tokio::test]
    async fn test_fetch_address_limits() {
        let mock_server = create_mock_server("/limits/NIM/NQ01", 200, ADDRESS_LIMITS).await;
        let provider = FastspotLimitsProvider::new(&mock_server.uri(), None).unwrap();

        let quota = provider.get_limits(CryptoCurrency::Nim, "NQ01").await.unwrap();
        assert_eq!(quota.native.monthly, 10_000_000.0);
        assert_eq!(quota.native.current, 2_500_000.0);
        assert_eq!(quota.reference.monthly_remaining, 15_000.0);
    }

    #[tokio::test]
    async fn test_api_key_is_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limits/BTC/bc1qa"))
            .and(header(API_KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ADDRESS_LIMITS))
            .expect(1)
            .mount(&mock_server)
            .await;
        let provider =
            FastspotLimitsProvider::new(&mock_server.uri(), Some("secret".to_string())).unwrap();

        assert!(provider.get_limits(CryptoCurrency::Btc, "bc1qa").await.is_ok());
    }

    #[tokio::test]
    async fn test_user_limits_not_found_is_none() {
        let mock_server = create_mock_server("/limits/user/abc", 404, "").await;
        let provider = FastspotLimitsProvider::new(&mock_server.uri(), None).unwrap();

        assert!(provider.get_user_limits("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_limits() {
        let body = r#"{"monthly": 20000, "current": 5000, "monthlyRemaining": 15000}"#;
        let mock_server = create_mock_server("/limits/user/abc", 200, body).await;
        let provider = FastspotLimitsProvider::new(&mock_server.uri(), None).unwrap();

        let quota = provider.get_user_limits("abc").await.unwrap().unwrap();
        assert_eq!(quota.current, 5_000.0);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limits/NIM/NQ01"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;
        let provider = FastspotLimitsProvider::new(&mock_server.uri(), None).unwrap();

        let err = provider.get_limits(CryptoCurrency::Nim, "NQ01").await.unwrap_err();
        assert!(format!("{err:#}").contains("503"));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = create_mock_server("/limits/NIM/NQ01", 200, r#"{"monthly": "x"}"#).await;
        let provider = FastspotLimitsProvider::new(&mock_server.uri(), None).unwrap();

        let err = provider.get_limits(CryptoCurrency::Nim, "NQ01").await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse limits response for NIM address NQ01"));
    }
}
