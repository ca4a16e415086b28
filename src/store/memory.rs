use crate::core::{
    BtcTransaction, CryptoCurrency, FiatCurrency, NimTransaction, PriceHistory,
    PriceHistoryProvider, SwapIndex, SwapRecord, TransactionStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Confirmed transactions whose missing fiat values can be filled in from
/// historical prices.
pub trait FiatBackfill {
    const CURRENCY: CryptoCurrency;

    /// Timestamp of a confirmed transaction that still lacks a `fiat` value.
    fn missing_fiat(&self, fiat: FiatCurrency) -> Option<DateTime<Utc>>;

    /// Fills missing values using `price`, the value of one whole coin.
    fn backfill(&mut self, fiat: FiatCurrency, price: f64);
}

fn has_fiat(values: Option<&HashMap<FiatCurrency, f64>>, fiat: FiatCurrency) -> bool {
    values.is_some_and(|v| v.contains_key(&fiat))
}

impl FiatBackfill for NimTransaction {
    const CURRENCY: CryptoCurrency = CryptoCurrency::Nim;

    fn missing_fiat(&self, fiat: FiatCurrency) -> Option<DateTime<Utc>> {
        self.timestamp
            .filter(|_| !has_fiat(self.fiat_value.as_ref(), fiat))
    }

    fn backfill(&mut self, fiat: FiatCurrency, price: f64) {
        let value = price * Self::CURRENCY.coins(self.value);
        self.fiat_value.get_or_insert_with(HashMap::new).insert(fiat, value);
    }
}

impl FiatBackfill for BtcTransaction {
    const CURRENCY: CryptoCurrency = CryptoCurrency::Btc;

    fn missing_fiat(&self, fiat: FiatCurrency) -> Option<DateTime<Utc>> {
        self.timestamp.filter(|_| {
            self.outputs
                .iter()
                .any(|o| !has_fiat(o.fiat_value.as_ref(), fiat))
        })
    }

    fn backfill(&mut self, fiat: FiatCurrency, price: f64) {
        for output in &mut self.outputs {
            if has_fiat(output.fiat_value.as_ref(), fiat) {
                continue;
            }
            let value = price * Self::CURRENCY.coins(output.value);
            output.fiat_value.get_or_insert_with(HashMap::new).insert(fiat, value);
        }
    }
}

/// In-memory transaction history of one ledger.
pub struct MemoryTransactionStore<T> {
    transactions: RwLock<Vec<T>>,
    prices: Option<Arc<dyn PriceHistoryProvider>>,
}

impl<T> MemoryTransactionStore<T> {
    pub fn new(transactions: Vec<T>) -> Self {
        Self {
            transactions: RwLock::new(transactions),
            prices: None,
        }
    }

    /// Missing fiat values of confirmed transactions are filled in with
    /// historical prices from `provider`.
    pub fn with_price_history(mut self, provider: Arc<dyn PriceHistoryProvider>) -> Self {
        self.prices = Some(provider);
        self
    }
}

impl<T: FiatBackfill> MemoryTransactionStore<T> {
    fn missing_range(&self, fiat: FiatCurrency) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let txs = self.transactions.read().ok()?;
        let mut missing = txs.iter().filter_map(|tx| tx.missing_fiat(fiat));
        let first = missing.next()?;
        Some(missing.fold((first, first), |(from, to), ts| (from.min(ts), to.max(ts))))
    }
}

#[async_trait]
impl<T> TransactionStore<T> for MemoryTransactionStore<T>
where
    T: FiatBackfill + Clone + Send + Sync,
{
    fn transactions(&self) -> Vec<T> {
        self.transactions
            .read()
            .map(|txs| txs.clone())
            .unwrap_or_default()
    }

    async fn calculate_fiat_amounts(&self, fiat: FiatCurrency) -> Result<()> {
        let Some(provider) = &self.prices else {
            return Ok(());
        };
        let Some((from, to)) = self.missing_range(fiat) else {
            return Ok(());
        };
        let history: PriceHistory = provider
            .get_price_history(
                T::CURRENCY,
                fiat,
                from - PriceHistory::max_gap(),
                to + PriceHistory::max_gap(),
            )
            .await
            .with_context(|| format!("Failed to fetch {} price history for backfill", T::CURRENCY))?;

        let mut txs = self
            .transactions
            .write()
            .map_err(|_| anyhow::anyhow!("Transaction store lock poisoned"))?;
        let mut filled = 0;
        for tx in txs.iter_mut() {
            let Some(price) = tx.missing_fiat(fiat).and_then(|ts| history.price_at(ts)) else {
                continue;
            };
            tx.backfill(fiat, price);
            filled += 1;
        }
        debug!(currency = %T::CURRENCY, %fiat, filled, "Backfilled fiat amounts");
        Ok(())
    }
}

/// In-memory index of known swaps and the transactions that took part in them.
#[derive(Debug, Clone, Default)]
pub struct MemorySwapIndex {
    by_tx: HashMap<String, String>,
    swaps: HashMap<String, SwapRecord>,
}

impl MemorySwapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, swap: SwapRecord, tx_hashes: &[impl AsRef<str>]) {
        for tx in tx_hashes {
            self.by_tx.insert(tx.as_ref().to_string(), swap.hash.clone());
        }
        self.swaps.insert(swap.hash.clone(), swap);
    }

    pub fn with_swap(mut self, swap: SwapRecord, tx_hashes: &[&str]) -> Self {
        self.insert(swap, tx_hashes);
        self
    }
}

impl SwapIndex for MemorySwapIndex {
    fn swap_hash(&self, tx_hash: &str) -> Option<String> {
        self.by_tx.get(tx_hash).cloned()
    }

    fn swap(&self, swap_hash: &str) -> Option<SwapRecord> {
        self.swaps.get(swap_hash).cloned()
    }
}
