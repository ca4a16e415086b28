pub mod memory;

use crate::core::{BtcTransaction, NimTransaction, SwapRecord};
use anyhow::{Context, Result};
use memory::{MemorySwapIndex, MemoryTransactionStore};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEntry {
    #[serde(flatten)]
    pub swap: SwapRecord,
    /// Ledger transactions that took part in the swap.
    pub transactions: Vec<String>,
}

/// Local transaction histories and known swaps, as exported by a wallet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default)]
    pub nim_transactions: Vec<NimTransaction>,
    #[serde(default)]
    pub btc_transactions: Vec<BtcTransaction>,
    #[serde(default)]
    pub swaps: Vec<SwapEntry>,
}

impl HistorySnapshot {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read history file: {}", path.as_ref().display()))?;
        let snapshot: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file: {}", path.as_ref().display()))?;
        debug!(
            nim = snapshot.nim_transactions.len(),
            btc = snapshot.btc_transactions.len(),
            swaps = snapshot.swaps.len(),
            "Loaded history snapshot"
        );
        Ok(snapshot)
    }

    pub fn into_stores(
        self,
    ) -> (
        MemoryTransactionStore<NimTransaction>,
        MemoryTransactionStore<BtcTransaction>,
        MemorySwapIndex,
    ) {
        let mut index = MemorySwapIndex::new();
        for entry in self.swaps {
            index.insert(entry.swap, &entry.transactions[..]);
        }
        (
            MemoryTransactionStore::new(self.nim_transactions),
            MemoryTransactionStore::new(self.btc_transactions),
            index,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FiatCurrency, SwapAsset, SwapIndex, TransactionStore};
    use std::io::Write;

    const SNAPSHOT: &str = r#"{
        "nim_transactions": [{
            "hash": "n1",
            "sender": "NQ01",
            "recipient": "NQ02",
            "value": 100000,
            "fiat_value": {"usd": 12.5},
            "timestamp": "2026-10-01T12:00:00Z"
        }],
        "btc_transactions": [{
            "hash": "b1",
            "inputs": [{"address": "bc1qa"}],
            "outputs": [{"address": "bc1qb", "value": 1000}]
        }],
        "swaps": [{"hash": "s1", "in_asset": "EUR", "in_amount": 4000, "transactions": ["b1"]}]
    }"#;

    #[test]
    fn test_load_snapshot() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(SNAPSHOT.as_bytes())?;

        let snapshot = HistorySnapshot::load_from_path(file.path())?;
        let (nim, btc, index) = snapshot.into_stores();

        let nim = nim.transactions();
        assert_eq!(nim[0].fiat_value.as_ref().unwrap()[&FiatCurrency::Usd], 12.5);
        assert!(nim[0].timestamp.is_some());
        assert!(btc.transactions()[0].timestamp.is_none());
        assert_eq!(index.swap_hash("b1").as_deref(), Some("s1"));
        assert_eq!(index.swap("s1").unwrap().in_asset, SwapAsset::Eur);
        Ok(())
    }

    #[test]
    fn test_missing_file_fails() {
        let result = HistorySnapshot::load_from_path("/nonexistent/history.json");
        assert!(result.unwrap_err().to_string().contains("Failed to read history file"));
    }
}
