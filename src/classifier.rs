//! Tags local ledger transactions with the swaps they belong to and values
//! them in USD for swap volume accounting.

use crate::core::config::LimitsPolicy;
use crate::core::{
    BtcOutput, BtcTransaction, CryptoCurrency, ExchangeRates, FiatCurrency, FiatValues,
    LimitsError, NimTransaction, SwapAsset, SwapIndex,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// An in-scope, swap-linked transaction counted towards swapped volume.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedTransaction {
    pub hash: String,
    pub swap_hash: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// USD value, historical when confirmed and live when pending.
    pub fiat_value: f64,
}

/// A swap funded from EUR, as seen from one of the user's transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSwap {
    pub swap_hash: String,
    /// Euro cents.
    pub amount: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedHistory {
    pub nim: Vec<ClassifiedTransaction>,
    pub btc: Vec<ClassifiedTransaction>,
    pub timed_swaps: Vec<TimedSwap>,
}

impl ClassifiedHistory {
    /// Total USD value swapped within the volume window, across both ledgers.
    pub fn swapped_volume(&self) -> f64 {
        self.nim.iter().chain(&self.btc).map(|tx| tx.fiat_value).sum()
    }
}

/// Result of picking the output of a BTC transaction that carries the swap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HtlcOutput<'a> {
    Found(&'a BtcOutput),
    NotFound,
    Ambiguous(usize),
}

impl<'a> HtlcOutput<'a> {
    pub fn into_result(self, tx_hash: &str) -> Result<&'a BtcOutput, LimitsError> {
        match self {
            HtlcOutput::Found(output) => Ok(output),
            HtlcOutput::NotFound => Err(LimitsError::HtlcOutputNotFound {
                tx_hash: tx_hash.to_string(),
            }),
            HtlcOutput::Ambiguous(matches) => Err(LimitsError::HtlcOutputAmbiguous {
                tx_hash: tx_hash.to_string(),
                matches,
            }),
        }
    }
}

/// A single output is always the relevant one. Otherwise the output paying to
/// an address of the HTLC length is.
pub fn select_swap_output(tx: &BtcTransaction, htlc_address_length: usize) -> HtlcOutput<'_> {
    if let [output] = tx.outputs.as_slice() {
        return HtlcOutput::Found(output);
    }
    let matches: Vec<&BtcOutput> = tx
        .outputs
        .iter()
        .filter(|o| o.address.as_ref().is_some_and(|a| a.len() == htlc_address_length))
        .collect();
    match matches.as_slice() {
        [output] => HtlcOutput::Found(output),
        [] => HtlcOutput::NotFound,
        many => HtlcOutput::Ambiguous(many.len()),
    }
}

/// Addresses whose transactions are taken into account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressScope {
    pub nim: HashSet<String>,
    pub btc: HashSet<String>,
}

pub struct TransactionClassifier<'a> {
    swaps: &'a dyn SwapIndex,
    policy: &'a LimitsPolicy,
    rates: &'a ExchangeRates,
    now: DateTime<Utc>,
}

impl<'a> TransactionClassifier<'a> {
    pub fn new(
        swaps: &'a dyn SwapIndex,
        policy: &'a LimitsPolicy,
        rates: &'a ExchangeRates,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            swaps,
            policy,
            rates,
            now,
        }
    }

    #[instrument(skip_all, fields(nim_txs = nim_txs.len(), btc_txs = btc_txs.len()))]
    pub fn classify(
        &self,
        nim_txs: &[NimTransaction],
        btc_txs: &[BtcTransaction],
        scope: &AddressScope,
    ) -> Result<ClassifiedHistory, LimitsError> {
        let mut history = ClassifiedHistory::default();
        let mut timed_seen = HashSet::new();

        let mut nim_swaps = HashSet::new();
        for tx in nim_txs
            .iter()
            .filter(|tx| scope.nim.contains(&tx.sender) || scope.nim.contains(&tx.recipient))
        {
            let Some(swap_hash) = self.swaps.swap_hash(&tx.hash) else {
                continue;
            };
            self.record_timed_swap(&swap_hash, tx.timestamp, &mut timed_seen, &mut history);

            if !self.in_volume_window(tx.timestamp) || !nim_swaps.insert(swap_hash.clone()) {
                continue;
            }
            let fiat_value = self.fiat_value(
                CryptoCurrency::Nim,
                tx.timestamp,
                tx.fiat_value.as_ref(),
                tx.value,
            )?;
            history.nim.push(ClassifiedTransaction {
                hash: tx.hash.clone(),
                swap_hash,
                timestamp: tx.timestamp,
                fiat_value,
            });
        }

        let mut btc_swaps = HashSet::new();
        for tx in btc_txs
            .iter()
            .filter(|tx| tx.addresses().any(|a| scope.btc.contains(a)))
        {
            let Some(swap_hash) = self.swaps.swap_hash(&tx.hash) else {
                continue;
            };
            self.record_timed_swap(&swap_hash, tx.timestamp, &mut timed_seen, &mut history);

            if !self.in_volume_window(tx.timestamp) {
                continue;
            }
            if nim_swaps.contains(&swap_hash) {
                debug!(tx = %tx.hash, swap = %swap_hash, "Swap already counted on NIM side");
                continue;
            }
            if !btc_swaps.insert(swap_hash.clone()) {
                continue;
            }
            let output = select_swap_output(tx, self.policy.htlc_address_length).into_result(&tx.hash)?;
            let fiat_value = self.fiat_value(
                CryptoCurrency::Btc,
                tx.timestamp,
                output.fiat_value.as_ref(),
                output.value,
            )?;
            history.btc.push(ClassifiedTransaction {
                hash: tx.hash.clone(),
                swap_hash,
                timestamp: tx.timestamp,
                fiat_value,
            });
        }

        debug!(
            nim = history.nim.len(),
            btc = history.btc.len(),
            eur_swaps = history.timed_swaps.len(),
            volume = history.swapped_volume(),
            "Classified transaction history"
        );
        Ok(history)
    }

    fn record_timed_swap(
        &self,
        swap_hash: &str,
        timestamp: Option<DateTime<Utc>>,
        seen: &mut HashSet<String>,
        history: &mut ClassifiedHistory,
    ) {
        let Some(swap) = self.swaps.swap(swap_hash) else {
            return;
        };
        if swap.in_asset == SwapAsset::Eur && seen.insert(swap.hash.clone()) {
            history.timed_swaps.push(TimedSwap {
                swap_hash: swap.hash,
                amount: swap.in_amount,
                timestamp,
            });
        }
    }

    /// Pending transactions are always inside the window.
    fn in_volume_window(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        let cutoff = self.now - self.policy.volume_window();
        timestamp.is_none_or(|ts| ts >= cutoff)
    }

    fn fiat_value(
        &self,
        crypto: CryptoCurrency,
        timestamp: Option<DateTime<Utc>>,
        stored: Option<&FiatValues>,
        base_units: u64,
    ) -> Result<f64, LimitsError> {
        if timestamp.is_some() {
            return Ok(stored
                .and_then(|values| values.get(&FiatCurrency::Usd))
                .copied()
                .unwrap_or(0.0));
        }
        self.rates
            .fiat_value(crypto, FiatCurrency::Usd, base_units)
            .ok_or(LimitsError::MissingRate(crypto))
    }
}
