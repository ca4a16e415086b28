use super::util::send_with_retry;
use crate::core::cache::Cache;
use crate::core::{
    CryptoCurrency, ExchangeRateProvider, ExchangeRates, FiatCurrency, PriceHistory,
    PriceHistoryProvider,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

fn coin_id(crypto: CryptoCurrency) -> &'static str {
    match crypto {
        CryptoCurrency::Nim => "nimiq-2",
        CryptoCurrency::Btc => "bitcoin",
    }
}

#[derive(Deserialize, Debug)]
struct MarketChart {
    /// `[unix millis, price]` pairs.
    prices: Vec<(f64, f64)>,
}

/// Live and historical prices from the CoinGecko API.
pub struct CoinGeckoRateProvider {
    base_url: String,
    api_key: Option<String>,
    cache: Arc<Cache<String, ExchangeRates>>,
}

impl CoinGeckoRateProvider {
    pub fn new(base_url: &str, api_key: Option<String>, cache: Arc<Cache<String, ExchangeRates>>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            cache,
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        debug!("Requesting {}", url);
        let client = reqwest::Client::builder()
            .user_agent(concat!("swap-limits/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let response = send_with_retry(
            || {
                let mut request = client.get(url).query(query);
                if let Some(api_key) = &self.api_key {
                    request = request.header(API_KEY_HEADER, api_key);
                }
                request.send()
            },
            2,
            500,
        )
        .await
        .context("Exchange rate request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP error: {}", status));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ExchangeRateProvider for CoinGeckoRateProvider {
    #[instrument(name = "CoinGeckoRates", skip(self))]
    async fn get_rates(
        &self,
        cryptos: &[CryptoCurrency],
        fiats: &[FiatCurrency],
    ) -> Result<ExchangeRates> {
        let ids = cryptos.iter().map(|c| coin_id(*c)).collect::<Vec<_>>().join(",");
        let vs = fiats.iter().map(|f| f.code()).collect::<Vec<_>>().join(",");
        let key = format!("{ids}|{vs}");
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let url = format!("{}/simple/price", self.base_url);
        let text = self
            .get(&url, &[("ids", ids.clone()), ("vs_currencies", vs)])
            .await
            .map_err(|e| anyhow!("{} for rates {}", e, ids))?;
        let data: HashMap<String, HashMap<String, f64>> = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for rates {}: {}", ids, e))?;

        let mut rates = ExchangeRates::new();
        for crypto in cryptos {
            let prices = data
                .get(coin_id(*crypto))
                .ok_or_else(|| anyhow!("No rate data found for {}", crypto))?;
            for fiat in fiats {
                if let Some(rate) = prices.get(fiat.code()) {
                    rates.set(*crypto, *fiat, *rate);
                }
            }
        }

        self.cache.put(key, rates.clone()).await;
        Ok(rates)
    }
}

#[async_trait]
impl PriceHistoryProvider for CoinGeckoRateProvider {
    #[instrument(name = "CoinGeckoHistory", skip(self))]
    async fn get_price_history(
        &self,
        crypto: CryptoCurrency,
        fiat: FiatCurrency,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PriceHistory> {
        let url = format!("{}/coins/{}/market_chart/range", self.base_url, coin_id(crypto));
        let text = self
            .get(
                &url,
                &[
                    ("vs_currency", fiat.code().to_string()),
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                ],
            )
            .await
            .map_err(|e| anyhow!("{} for {} price history", e, crypto))?;
        let chart: MarketChart = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse price history for {}: {}", crypto, e))?;

        let points = chart
            .prices
            .into_iter()
            .filter_map(|(millis, price)| {
                DateTime::from_timestamp_millis(millis as i64).map(|ts| (ts, price))
            })
            .collect::<Vec<_>>();
        debug!(points = points.len(), "Fetched price history");
        Ok(PriceHistory::new(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MOCK_JSON: &str = r#"{
        "nimiq-2": {"usd": 0.0012, "eur": 0.0011},
        "bitcoin": {"usd": 60000.0, "eur": 55000.0}
    }"#;

    #[tokio::test]
    async fn test_successful_rates_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "nimiq-2,bitcoin"))
            .and(query_param("vs_currencies", "usd,eur"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MOCK_JSON))
            .expect(1)
            .mount(&mock_server)
            .await;
        let provider = CoinGeckoRateProvider::new(&mock_server.uri(), None, Arc::new(Cache::new()));

        let cryptos = [CryptoCurrency::Nim, CryptoCurrency::Btc];
        let fiats = [FiatCurrency::Usd, FiatCurrency::Eur];
        let rates = provider.get_rates(&cryptos, &fiats).await.unwrap();
        assert_eq!(rates.get(CryptoCurrency::Nim, FiatCurrency::Usd), Some(0.0012));
        assert_eq!(rates.get(CryptoCurrency::Btc, FiatCurrency::Eur), Some(55000.0));

        // Served from cache, the mock expects a single request
        let cached = provider.get_rates(&cryptos, &fiats).await.unwrap();
        assert_eq!(cached, rates);
    }

    #[tokio::test]
    async fn test_missing_coin_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"bitcoin": {"usd": 1.0}}"#))
            .mount(&mock_server)
            .await;
        let provider = CoinGeckoRateProvider::new(&mock_server.uri(), None, Arc::new(Cache::new()));

        let result = provider
            .get_rates(&[CryptoCurrency::Nim], &[FiatCurrency::Usd])
            .await;
        assert_eq!(result.unwrap_err().to_string(), "No rate data found for NIM");
    }

    #[tokio::test]
    async fn test_client_error_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;
        let provider = CoinGeckoRateProvider::new(&mock_server.uri(), None, Arc::new(Cache::new()));

        let result = provider
            .get_rates(&[CryptoCurrency::Btc], &[FiatCurrency::Usd])
            .await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "HTTP error: 429 Too Many Requests for rates bitcoin"
        );
    }

    #[tokio::test]
    async fn test_price_history_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/nimiq-2/market_chart/range"))
            .and(query_param("vs_currency", "usd"))
            .and(query_param("from", "1700000000"))
            .and(query_param("to", "1700086400"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"prices": [[1700003600000, 0.75], [1700000000000, 0.5]], "market_caps": [], "total_volumes": []}"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;
        let provider = CoinGeckoRateProvider::new(&mock_server.uri(), None, Arc::new(Cache::new()));

        let from = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let to = DateTime::from_timestamp(1_700_086_400, 0).unwrap();
        let history = provider
            .get_price_history(CryptoCurrency::Nim, FiatCurrency::Usd, from, to)
            .await
            .unwrap();

        assert_eq!(history.price_at(from), Some(0.5));
        assert_eq!(history.price_at(from + chrono::Duration::minutes(50)), Some(0.75));
    }

    #[tokio::test]
    async fn test_price_history_malformed_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin/market_chart/range"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"error": "coin not found"}"#))
            .mount(&mock_server)
            .await;
        let provider = CoinGeckoRateProvider::new(&mock_server.uri(), None, Arc::new(Cache::new()));

        let now = Utc::now();
        let result = provider
            .get_price_history(CryptoCurrency::Btc, FiatCurrency::Usd, now, now)
            .await;
        assert!(
            result
                .unwrap_err()
                .to_string()
                .starts_with("Failed to parse price history for BTC")
        );
    }
}
