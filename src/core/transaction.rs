//! Ledger transactions, swap records and the local stores that hold them

use crate::core::currency::{FiatCurrency, FiatValues};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NimTransaction {
    pub hash: String,
    pub sender: String,
    pub recipient: String,
    /// Amount in luna.
    pub value: u64,
    #[serde(default)]
    pub fiat_value: Option<FiatValues>,
    /// `None` while the transaction is pending.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcInput {
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcOutput {
    pub address: Option<String>,
    /// Amount in satoshi.
    pub value: u64,
    #[serde(default)]
    pub fiat_value: Option<FiatValues>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BtcTransaction {
    pub hash: String,
    pub inputs: Vec<BtcInput>,
    pub outputs: Vec<BtcOutput>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BtcTransaction {
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter_map(|i| i.address.as_deref())
            .chain(self.outputs.iter().filter_map(|o| o.address.as_deref()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwapAsset {
    Nim,
    Btc,
    Eur,
}

/// A recorded swap. `in_amount` is in the minor unit of `in_asset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub hash: String,
    pub in_asset: SwapAsset,
    pub in_amount: u64,
}

/// Read-only view of the local transaction history of one ledger.
#[async_trait]
pub trait TransactionStore<T>: Send + Sync {
    fn transactions(&self) -> Vec<T>;

    /// Backfills historical fiat values for confirmed transactions.
    async fn calculate_fiat_amounts(&self, fiat: FiatCurrency) -> Result<()>;
}

/// Maps ledger transactions to the swaps they took part in.
pub trait SwapIndex: Send + Sync {
    fn swap_hash(&self, tx_hash: &str) -> Option<String>;
    fn swap(&self, swap_hash: &str) -> Option<SwapRecord>;
}
