pub mod classifier;
pub mod cli;
pub mod controller;
pub mod conversion;
pub mod core;
pub mod new_user;
pub mod providers;
pub mod resolver;
pub mod store;

use crate::controller::{AccountSelection, Collaborators, LimitsContext, LimitsController};
use crate::core::cache::Cache;
use crate::core::config::AppConfig;
use crate::core::{CryptoCurrency, ExchangeRateProvider, FiatCurrency};
use crate::resolver::SwapLimits;
use crate::store::HistorySnapshot;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const RATE_CRYPTOS: [CryptoCurrency; 2] = [CryptoCurrency::Nim, CryptoCurrency::Btc];
const RATE_FIATS: [FiatCurrency; 1] = [FiatCurrency::Usd];

#[derive(Debug, Clone, Default)]
pub struct LimitsArgs {
    pub account_id: Option<String>,
    /// Active NIM address, queried for its address quota.
    pub nim_address: Option<String>,
    /// BTC address queried for its address quota.
    pub btc_address: Option<String>,
    /// Further account addresses whose history counts towards swapped volume.
    pub nim_addresses: Vec<String>,
    pub btc_addresses: Vec<String>,
    pub currency: Option<CryptoCurrency>,
    pub fiat_to_crypto: bool,
    pub json: bool,
    /// Re-fetch rates at this interval (seconds) and print every new snapshot.
    pub watch: Option<u64>,
}

impl LimitsArgs {
    pub fn selection(&self) -> AccountSelection {
        let mut nim_addresses: HashSet<String> = self.nim_addresses.iter().cloned().collect();
        nim_addresses.extend(self.nim_address.clone());
        let mut btc_addresses: HashSet<String> = self.btc_addresses.iter().cloned().collect();
        btc_addresses.extend(self.btc_address.clone());

        AccountSelection {
            account_id: self.account_id.clone(),
            active_currency: self.currency.unwrap_or(CryptoCurrency::Nim),
            active_nim_address: self.nim_address.clone(),
            nim_addresses,
            btc_addresses,
        }
    }
}

pub enum AppCommand {
    Limits(LimitsArgs),
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Limits(args) => match args.watch {
            Some(interval) => {
                let watch = LimitsWatch::start(&config, &args).await?;
                watch.run(Duration::from_secs(interval.max(1)), args.json).await
            }
            None => {
                let spinner = (!args.json).then(|| cli::ui::new_spinner("Fetching swap limits..."));
                let result = compute(&config, &args).await;
                if let Some(spinner) = spinner {
                    spinner.finish_and_clear();
                }
                print_limits(&result?, args.json)
            }
        },
    }
}

struct Services {
    collaborators: Collaborators,
    rates: Arc<dyn ExchangeRateProvider>,
}

fn build_services(config: &AppConfig) -> Result<Services> {
    let fastspot = config.providers.fastspot.clone().unwrap_or_default();
    let rates_config = config.providers.rates.clone().unwrap_or_default();

    let limits = providers::FastspotLimitsProvider::new(&fastspot.base_url, fastspot.api_key)?;
    let rate_cache = Arc::new(Cache::with_ttl(Duration::from_secs(rates_config.ttl_secs)));
    let coingecko = Arc::new(providers::CoinGeckoRateProvider::new(
        &rates_config.base_url,
        rates_config.api_key,
        rate_cache,
    ));

    let history = match &config.history_path {
        Some(path) => HistorySnapshot::load_from_path(path)?,
        None => HistorySnapshot::default(),
    };
    let (nim_store, btc_store, swaps) = history.into_stores();

    Ok(Services {
        collaborators: Collaborators {
            limits: Arc::new(limits),
            nim_store: Arc::new(nim_store.with_price_history(coingecko.clone())),
            btc_store: Arc::new(btc_store.with_price_history(coingecko.clone())),
            swaps: Arc::new(swaps),
        },
        rates: coingecko,
    })
}

/// Computes swap limits once for the given account and addresses.
pub async fn compute(config: &AppConfig, args: &LimitsArgs) -> Result<SwapLimits> {
    let services = build_services(config)?;
    let rates = services
        .rates
        .get_rates(&RATE_CRYPTOS, &RATE_FIATS)
        .await
        .context("Failed to fetch exchange rates")?;

    let ctx = LimitsContext::new(
        &args.selection(),
        args.btc_address.clone(),
        args.fiat_to_crypto,
        rates,
        Utc::now(),
    );
    controller::compute_limits(&services.collaborators, &config.policy, &ctx).await
}

/// A running [`LimitsController`] fed with live rates.
pub struct LimitsWatch {
    pub controller: LimitsController,
    rates: Arc<dyn ExchangeRateProvider>,
}

impl LimitsWatch {
    /// Fetches live rates, then dispatches the first pass for the selection
    /// in `args`, so pending swaps can be valued from the start.
    pub async fn start(config: &AppConfig, args: &LimitsArgs) -> Result<Self> {
        let services = build_services(config)?;
        let rates = services
            .rates
            .get_rates(&RATE_CRYPTOS, &RATE_FIATS)
            .await
            .context("Failed to fetch exchange rates")?;

        let controller =
            LimitsController::with_rates(services.collaborators, config.policy.clone(), rates);
        controller.set_btc_address(args.btc_address.clone());
        controller.set_fiat_to_crypto(args.fiat_to_crypto);
        if controller.set_selection(args.selection()).is_none() {
            controller.recompute();
        }
        Ok(Self {
            controller,
            rates: services.rates,
        })
    }

    /// Re-fetches rates every `interval` and prints every published snapshot
    /// and pass failure until Ctrl-C.
    pub async fn run(self, interval: Duration, json: bool) -> Result<()> {
        let mut limits_rx = self.controller.subscribe();
        let mut errors_rx = self.controller.subscribe_errors();
        limits_rx.mark_changed();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        info!(interval = ?interval, "Watching swap limits, press Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.rates.get_rates(&RATE_CRYPTOS, &RATE_FIATS).await {
                        Ok(rates) => {
                            if self.controller.update_rates(rates).is_none() {
                                debug!("Exchange rates unchanged");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to refresh exchange rates"),
                    }
                }
                changed = limits_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = *limits_rx.borrow_and_update();
                    if let Some(snapshot) = snapshot {
                        print_limits(&snapshot.limits, json)?;
                    }
                }
                changed = errors_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(e) = errors_rx.borrow_and_update().clone() {
                        eprintln!("{}", cli::ui::style_text(&e, cli::ui::StyleType::Error));
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }
}

fn print_limits(limits: &SwapLimits, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(limits)?);
    } else {
        println!("{}", limits.display_as_table());
        println!(
            "{}",
            cli::ui::style_text(
                &format!("Computed at {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")),
                cli::ui::StyleType::Subtle
            )
        );
    }
    Ok(())
}
