//! Currency definitions and exchange rate abstractions

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoCurrency {
    Nim,
    Btc,
}

impl CryptoCurrency {
    /// Number of base units (luna, satoshi) in one whole coin.
    pub fn base_units(&self) -> u64 {
        match self {
            CryptoCurrency::Nim => 100_000,
            CryptoCurrency::Btc => 100_000_000,
        }
    }

    /// Whole coins in `base_units`.
    pub fn coins(&self, base_units: u64) -> f64 {
        base_units as f64 / self.base_units() as f64
    }

    /// Ticker used by the swap service.
    pub fn ticker(&self) -> &'static str {
        match self {
            CryptoCurrency::Nim => "NIM",
            CryptoCurrency::Btc => "BTC",
        }
    }
}

impl Display for CryptoCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

impl FromStr for CryptoCurrency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NIM" => Ok(CryptoCurrency::Nim),
            "BTC" => Ok(CryptoCurrency::Btc),
            _ => Err(anyhow::anyhow!("Invalid cryptocurrency: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiatCurrency {
    Usd,
    Eur,
}

impl FiatCurrency {
    pub fn code(&self) -> &'static str {
        match self {
            FiatCurrency::Usd => "usd",
            FiatCurrency::Eur => "eur",
        }
    }
}

impl Display for FiatCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code().to_uppercase())
    }
}

/// Fiat values of an amount keyed by fiat currency, as stored on transactions.
pub type FiatValues = HashMap<FiatCurrency, f64>;

/// Live value of one whole coin of each cryptocurrency, per fiat currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    rates: HashMap<CryptoCurrency, FiatValues>,
}

impl ExchangeRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, crypto: CryptoCurrency, fiat: FiatCurrency, rate: f64) -> Self {
        self.set(crypto, fiat, rate);
        self
    }

    pub fn set(&mut self, crypto: CryptoCurrency, fiat: FiatCurrency, rate: f64) {
        self.rates.entry(crypto).or_default().insert(fiat, rate);
    }

    pub fn get(&self, crypto: CryptoCurrency, fiat: FiatCurrency) -> Option<f64> {
        self.rates.get(&crypto).and_then(|r| r.get(&fiat)).copied()
    }

    /// Fiat value of `base_units` of `crypto`, if a rate is known.
    pub fn fiat_value(&self, crypto: CryptoCurrency, fiat: FiatCurrency, base_units: u64) -> Option<f64> {
        self.get(crypto, fiat)
            .map(|rate| rate * crypto.coins(base_units))
    }
}

/// Dated prices of one whole coin in a single fiat currency, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceHistory {
    points: Vec<(DateTime<Utc>, f64)>,
}

impl PriceHistory {
    pub fn new(mut points: Vec<(DateTime<Utc>, f64)>) -> Self {
        points.sort_by_key(|(ts, _)| *ts);
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points further than this from the requested time are not used.
    pub fn max_gap() -> Duration {
        Duration::days(1)
    }

    /// Price of the point closest to `at`, if one lies within [`Self::max_gap`].
    pub fn price_at(&self, at: DateTime<Utc>) -> Option<f64> {
        let index = self.points.partition_point(|(ts, _)| *ts < at);
        let before = index.checked_sub(1).and_then(|i| self.points.get(i));
        let after = self.points.get(index);
        let closest = match (before, after) {
            (Some(b), Some(a)) if at - b.0 < a.0 - at => b,
            (_, Some(a)) => a,
            (Some(b), None) => b,
            (None, None) => return None,
        };
        ((closest.0 - at).abs() <= Self::max_gap()).then_some(closest.1)
    }
}

#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn get_rates(
        &self,
        cryptos: &[CryptoCurrency],
        fiats: &[FiatCurrency],
    ) -> Result<ExchangeRates>;
}

/// Source of historical prices, used to value confirmed transactions.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn get_price_history(
        &self,
        crypto: CryptoCurrency,
        fiat: FiatCurrency,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PriceHistory>;
}
