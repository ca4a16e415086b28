//! Decides when swap limits are recomputed and publishes each new snapshot.
//!
//! Every trigger dispatches a full, independent pass over an explicit
//! [`LimitsContext`] captured at dispatch time. Passes are numbered; a pass
//! that completes after a newer one was dispatched discards its result, so
//! the published snapshot always belongs to the most recent trigger.

use crate::classifier::{AddressScope, TransactionClassifier};
use crate::core::config::LimitsPolicy;
use crate::core::{
    BtcTransaction, CryptoCurrency, ExchangeRates, FiatCurrency, LimitsProvider, NimTransaction,
    SwapIndex, TransactionStore,
};
use crate::new_user::remaining_eur_allowance;
use crate::resolver::{LimitsResolver, QuotaRequest, SwapLimits};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

/// Read-only collaborators a pass reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub limits: Arc<dyn LimitsProvider>,
    pub nim_store: Arc<dyn TransactionStore<NimTransaction>>,
    pub btc_store: Arc<dyn TransactionStore<BtcTransaction>>,
    pub swaps: Arc<dyn SwapIndex>,
}

/// The wallet's currently active account and addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSelection {
    pub account_id: Option<String>,
    pub active_currency: CryptoCurrency,
    pub active_nim_address: Option<String>,
    pub nim_addresses: HashSet<String>,
    pub btc_addresses: HashSet<String>,
}

impl Default for AccountSelection {
    fn default() -> Self {
        Self {
            account_id: None,
            active_currency: CryptoCurrency::Nim,
            active_nim_address: None,
            nim_addresses: HashSet::new(),
            btc_addresses: HashSet::new(),
        }
    }
}

/// Everything one pass needs, captured when the pass is dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsContext {
    pub account_id: Option<String>,
    pub nim_address: Option<String>,
    pub btc_address: Option<String>,
    pub fiat_to_crypto: bool,
    pub scope: AddressScope,
    pub rates: ExchangeRates,
    pub now: DateTime<Utc>,
}

impl LimitsContext {
    /// A non-NIM active currency leaves the NIM address unset.
    pub fn new(
        selection: &AccountSelection,
        btc_address: Option<String>,
        fiat_to_crypto: bool,
        rates: ExchangeRates,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: selection.account_id.clone(),
            nim_address: (selection.active_currency == CryptoCurrency::Nim)
                .then(|| selection.active_nim_address.clone())
                .flatten(),
            btc_address,
            fiat_to_crypto,
            scope: AddressScope {
                nim: selection.nim_addresses.clone(),
                btc: selection.btc_addresses.clone(),
            },
            rates,
            now,
        }
    }
}

/// Runs one complete limits computation.
#[instrument(skip_all, fields(fiat_to_crypto = ctx.fiat_to_crypto))]
pub async fn compute_limits(
    collaborators: &Collaborators,
    policy: &LimitsPolicy,
    ctx: &LimitsContext,
) -> Result<SwapLimits> {
    collaborators
        .nim_store
        .calculate_fiat_amounts(FiatCurrency::Usd)
        .await
        .context("Failed to calculate NIM fiat amounts")?;
    collaborators
        .btc_store
        .calculate_fiat_amounts(FiatCurrency::Usd)
        .await
        .context("Failed to calculate BTC fiat amounts")?;

    let nim_txs = collaborators.nim_store.transactions();
    let btc_txs = collaborators.btc_store.transactions();
    let classifier =
        TransactionClassifier::new(collaborators.swaps.as_ref(), policy, &ctx.rates, ctx.now);
    let history = classifier.classify(&nim_txs, &btc_txs, &ctx.scope)?;

    let eur_allowance = if ctx.fiat_to_crypto {
        remaining_eur_allowance(&history.timed_swaps, policy, ctx.now)
    } else {
        f64::INFINITY
    };

    let request = QuotaRequest {
        account_id: ctx.account_id.clone(),
        nim_address: ctx.nim_address.clone(),
        btc_address: ctx.btc_address.clone(),
    };
    LimitsResolver::new(collaborators.limits.as_ref(), policy)
        .resolve(&request, history.swapped_volume(), eur_allowance)
        .await
}

/// A published result and the pass that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitsSnapshot {
    pub sequence: u64,
    pub limits: SwapLimits,
}

#[derive(Debug, Default)]
struct Inputs {
    selection: AccountSelection,
    btc_address: Option<String>,
    fiat_to_crypto: bool,
    rates: ExchangeRates,
    manual_requests: u64,
}

struct Shared {
    collaborators: Collaborators,
    policy: LimitsPolicy,
    inputs: Mutex<Inputs>,
    dispatched: AtomicU64,
    limits: watch::Sender<Option<LimitsSnapshot>>,
    last_error: watch::Sender<Option<String>>,
}

/// Recomputes swap limits whenever one of its inputs changes.
///
/// Triggering methods spawn onto the current tokio runtime.
#[derive(Clone)]
pub struct LimitsController {
    shared: Arc<Shared>,
}

impl LimitsController {
    pub fn new(collaborators: Collaborators, policy: LimitsPolicy) -> Self {
        Self::with_rates(collaborators, policy, ExchangeRates::new())
    }

    /// Starts from a known rate table without dispatching a pass.
    pub fn with_rates(collaborators: Collaborators, policy: LimitsPolicy, rates: ExchangeRates) -> Self {
        let (limits, _) = watch::channel(None);
        let (last_error, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                collaborators,
                policy,
                inputs: Mutex::new(Inputs {
                    rates,
                    ..Inputs::default()
                }),
                dispatched: AtomicU64::new(0),
                limits,
                last_error,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LimitsSnapshot>> {
        self.shared.limits.subscribe()
    }

    /// Failure of the latest pass, cleared by the next successful one.
    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.shared.last_error.subscribe()
    }

    pub fn limits(&self) -> Option<SwapLimits> {
        self.shared.limits.borrow().map(|s| s.limits)
    }

    pub fn manual_requests(&self) -> u64 {
        self.inputs().manual_requests
    }

    /// Requests a recomputation with unchanged inputs.
    pub fn recompute(&self) -> JoinHandle<()> {
        let mut inputs = self.inputs();
        inputs.manual_requests += 1;
        self.spawn_pass(inputs)
    }

    /// Recomputes and returns the result to the caller, including failures.
    /// Yields `Ok(None)` when a newer pass was dispatched in the meantime.
    pub async fn refresh(&self) -> Result<Option<SwapLimits>> {
        let (sequence, ctx) = self.dispatch(self.inputs());
        run_pass(&self.shared, sequence, ctx).await
    }

    pub fn set_selection(&self, selection: AccountSelection) -> Option<JoinHandle<()>> {
        let mut inputs = self.inputs();
        if inputs.selection == selection {
            return None;
        }
        inputs.selection = selection;
        Some(self.spawn_pass(inputs))
    }

    pub fn set_active_currency(&self, currency: CryptoCurrency) -> Option<JoinHandle<()>> {
        let mut inputs = self.inputs();
        if inputs.selection.active_currency == currency {
            return None;
        }
        inputs.selection.active_currency = currency;
        Some(self.spawn_pass(inputs))
    }

    pub fn set_active_nim_address(&self, address: Option<String>) -> Option<JoinHandle<()>> {
        let mut inputs = self.inputs();
        if inputs.selection.active_nim_address == address {
            return None;
        }
        inputs.selection.active_nim_address = address;
        Some(self.spawn_pass(inputs))
    }

    pub fn update_rates(&self, rates: ExchangeRates) -> Option<JoinHandle<()>> {
        let mut inputs = self.inputs();
        if inputs.rates == rates {
            return None;
        }
        inputs.rates = rates;
        Some(self.spawn_pass(inputs))
    }

    /// Takes effect on the next pass.
    pub fn set_btc_address(&self, address: Option<String>) {
        self.inputs().btc_address = address;
    }

    /// Takes effect on the next pass.
    pub fn set_fiat_to_crypto(&self, fiat_to_crypto: bool) {
        self.inputs().fiat_to_crypto = fiat_to_crypto;
    }

    fn inputs(&self) -> MutexGuard<'_, Inputs> {
        self.shared
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Numbers the pass and snapshots its inputs while the input lock is held,
    /// so sequence order matches input order.
    fn dispatch(&self, inputs: MutexGuard<'_, Inputs>) -> (u64, LimitsContext) {
        let sequence = self.shared.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = LimitsContext::new(
            &inputs.selection,
            inputs.btc_address.clone(),
            inputs.fiat_to_crypto,
            inputs.rates.clone(),
            Utc::now(),
        );
        debug!(sequence, "Dispatching limits pass");
        (sequence, ctx)
    }

    fn spawn_pass(&self, inputs: MutexGuard<'_, Inputs>) -> JoinHandle<()> {
        let (sequence, ctx) = self.dispatch(inputs);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            // Failures are already published on the error channel
            let _ = run_pass(&shared, sequence, ctx).await;
        })
    }
}

async fn run_pass(shared: &Shared, sequence: u64, ctx: LimitsContext) -> Result<Option<SwapLimits>> {
    let result = compute_limits(&shared.collaborators, &shared.policy, &ctx).await;
    let is_latest = || shared.dispatched.load(Ordering::SeqCst) == sequence;

    match result {
        Ok(limits) => {
            let published = shared.limits.send_if_modified(|current| {
                if !is_latest() || current.is_some_and(|c| c.sequence >= sequence) {
                    return false;
                }
                *current = Some(LimitsSnapshot { sequence, limits });
                true
            });
            if !published {
                debug!(sequence, "Discarding result of superseded pass");
                return Ok(None);
            }
            shared.last_error.send_replace(None);
            info!(sequence, current_usd = limits.current.usd, "Published swap limits");
            Ok(Some(limits))
        }
        Err(e) => {
            error!(sequence, error = %e, "Limits pass failed, keeping previous snapshot");
            if is_latest() {
                shared.last_error.send_replace(Some(format!("{e:#}")));
            }
            Err(e)
        }
    }
}
