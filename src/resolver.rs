//! Combines remote quotas with locally observed swap volume into the final
//! limits snapshot.

use crate::conversion::UnitRate;
use crate::core::config::LimitsPolicy;
use crate::core::{AccountQuota, AddressQuota, CryptoCurrency, LimitsProvider, Quota};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitAmount {
    pub usd: f64,
    pub luna: u64,
    pub sat: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurrentLimit {
    pub usd: f64,
    pub luna: u64,
    pub sat: u64,
    /// First-use EUR allowance; infinite when it does not apply.
    pub eur: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwapLimits {
    pub current: CurrentLimit,
    pub monthly: LimitAmount,
    pub remaining: LimitAmount,
}

/// Inputs of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaRequest {
    pub account_id: Option<String>,
    pub nim_address: Option<String>,
    pub btc_address: Option<String>,
}

/// Remote quotas fetched for one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchedQuotas {
    pub account: Option<AccountQuota>,
    pub nim: AddressQuota,
    pub btc: AddressQuota,
    pub has_nim_address: bool,
    pub has_btc_address: bool,
}

pub struct LimitsResolver<'a> {
    provider: &'a dyn LimitsProvider,
    policy: &'a LimitsPolicy,
}

impl<'a> LimitsResolver<'a> {
    pub fn new(provider: &'a dyn LimitsProvider, policy: &'a LimitsPolicy) -> Self {
        Self { provider, policy }
    }

    #[instrument(skip(self), fields(account = request.account_id.is_some()))]
    pub async fn resolve(
        &self,
        request: &QuotaRequest,
        swapped_volume: f64,
        eur_allowance: f64,
    ) -> Result<SwapLimits> {
        let quotas = self.fetch(request).await?;
        Ok(combine(&quotas, swapped_volume, eur_allowance))
    }

    pub async fn fetch(&self, request: &QuotaRequest) -> Result<FetchedQuotas> {
        let nim_address = request
            .nim_address
            .as_deref()
            .unwrap_or(&self.policy.nim_placeholder_address);
        let btc_address = request
            .btc_address
            .as_deref()
            .unwrap_or(&self.policy.btc_placeholder_address);

        let account = async {
            match &request.account_id {
                Some(id) => self
                    .provider
                    .get_user_limits(id)
                    .await
                    .context("Failed to fetch account limits"),
                None => Ok(None),
            }
        };
        let nim = async {
            self.provider
                .get_limits(CryptoCurrency::Nim, nim_address)
                .await
                .context("Failed to fetch NIM address limits")
        };
        let btc = async {
            self.provider
                .get_limits(CryptoCurrency::Btc, btc_address)
                .await
                .context("Failed to fetch BTC address limits")
        };

        let (account, nim, btc) = futures::try_join!(account, nim, btc)?;
        debug!(?account, ?nim, ?btc, "Fetched quotas");

        Ok(FetchedQuotas {
            account,
            nim,
            btc,
            has_nim_address: request.nim_address.is_some(),
            has_btc_address: request.btc_address.is_some(),
        })
    }
}

/// Derives the limits snapshot from fetched quotas. USD figures are converted
/// from cents; luna and sat use rates derived from the same NIM and BTC quotas.
pub fn combine(quotas: &FetchedQuotas, swapped_volume: f64, eur_allowance: f64) -> SwapLimits {
    let nim_reference = quotas.nim.reference;
    let monthly = quotas
        .account
        .map_or(nim_reference.monthly, |account| account.monthly)
        / 100.0;
    let after_swaps = nim_reference.monthly / 100.0 - swapped_volume;

    let bound = |field: fn(&Quota) -> f64| {
        let terms = [
            quotas.account.as_ref().map(field),
            Some(after_swaps * 100.0),
            quotas.has_nim_address.then(|| field(&quotas.nim.reference)),
            quotas.has_btc_address.then(|| field(&quotas.btc.reference)),
        ];
        let cents = terms.into_iter().flatten().fold(f64::INFINITY, f64::min);
        (cents / 100.0).max(0.0)
    };
    let current = bound(|q| q.current);
    let remaining = bound(|q| q.monthly_remaining);

    let luna_rate = UnitRate::from_quota(&quotas.nim);
    let sat_rate = UnitRate::from_quota(&quotas.btc);
    let amount = |usd: f64| LimitAmount {
        usd,
        luna: luna_rate.to_native(usd),
        sat: sat_rate.to_native(usd),
    };

    let current = amount(current);
    SwapLimits {
        current: CurrentLimit {
            usd: current.usd,
            luna: current.luna,
            sat: current.sat,
            eur: eur_allowance,
        },
        monthly: amount(monthly),
        remaining: amount(remaining),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn quota(monthly: f64, current: f64, monthly_remaining: f64) -> Quota {
        Quota {
            monthly,
            current,
            monthly_remaining,
        }
    }

    fn address_quota(reference: Quota, native_monthly: f64) -> AddressQuota {
        AddressQuota {
            native: quota(native_monthly, 0.0, 0.0),
            reference,
        }
    }

    // $200 a month, $50 now, $150 left; 0.25 $/luna and 0.5 $/sat
    fn quotas(account: Option<Quota>, has_nim: bool, has_btc: bool) -> FetchedQuotas {
        FetchedQuotas {
            account,
            nim: address_quota(quota(20_000.0, 5_000.0, 15_000.0), 800.0),
            btc: address_quota(quota(20_000.0, 5_000.0, 15_000.0), 400.0),
            has_nim_address: has_nim,
            has_btc_address: has_btc,
        }
    }

    #[test]
    fn test_account_quota_scenario() {
        let account = quota(20_000.0, 5_000.0, 15_000.0);
        let limits = combine(&quotas(Some(account), true, true), 0.0, f64::INFINITY);

        assert_eq!(limits.current.usd, 50.0);
        assert_eq!(limits.monthly.usd, 200.0);
        assert_eq!(limits.remaining.usd, 150.0);
        // 0.25 $/luna and 0.5 $/sat
        assert_eq!(limits.current.luna, 200);
        assert_eq!(limits.current.sat, 100);
        assert_eq!(limits.monthly.luna, 800);
        assert_eq!(limits.remaining.sat, 300);
        assert_eq!(limits.current.eur, f64::INFINITY);
    }

    #[test]
    fn test_anonymous_without_addresses_is_monthly_minus_swapped() {
        let limits = combine(&quotas(None, false, false), 30.0, f64::INFINITY);

        assert_eq!(limits.monthly.usd, 200.0);
        assert_eq!(limits.current.usd, 170.0);
        assert_eq!(limits.remaining.usd, 170.0);
    }

    #[test]
    fn test_swapped_volume_binds_when_smallest() {
        let account = quota(20_000.0, 50_000.0, 50_000.0);
        let limits = combine(&quotas(Some(account), false, false), 30.0, f64::INFINITY);
        assert_eq!(limits.current.usd, 170.0);
        assert_eq!(limits.remaining.usd, 170.0);
    }

    #[test]
    fn test_address_quotas_only_bind_when_address_given() {
        let mut fetched = quotas(None, false, true);
        fetched.btc.reference = quota(20_000.0, 1_000.0, 2_000.0);
        let limits = combine(&fetched, 0.0, f64::INFINITY);
        assert_eq!(limits.current.usd, 10.0);
        assert_eq!(limits.remaining.usd, 20.0);

        fetched.has_btc_address = false;
        let limits = combine(&fetched, 0.0, f64::INFINITY);
        assert_eq!(limits.current.usd, 200.0);
    }

    #[test]
    fn test_negative_results_clamp_to_zero() {
        let limits = combine(&quotas(None, true, true), 500.0, 0.0);
        assert_eq!(limits.current.usd, 0.0);
        assert_eq!(limits.remaining.usd, 0.0);
        assert_eq!(limits.current.luna, 0);
        assert_eq!(limits.remaining.sat, 0);
        assert!(limits.remaining.usd <= limits.monthly.usd);
    }

    struct StaticProvider {
        account: Option<Quota>,
        addresses: HashMap<(CryptoCurrency, String), AddressQuota>,
        queried: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LimitsProvider for StaticProvider {
        async fn get_limits(&self, asset: CryptoCurrency, address: &str) -> Result<AddressQuota> {
            self.queried.lock().unwrap().push(address.to_string());
            self.addresses
                .get(&(asset, address.to_string()))
                .copied()
                .ok_or_else(|| anyhow::anyhow!("Unknown address {address}"))
        }

        async fn get_user_limits(&self, _account_id: &str) -> Result<Option<AccountQuota>> {
            Ok(self.account)
        }
    }

    #[tokio::test]
    async fn test_missing_addresses_query_placeholders() {
        let policy = LimitsPolicy::default();
        let reference = quota(20_000.0, 5_000.0, 15_000.0);
        let provider = StaticProvider {
            account: None,
            addresses: HashMap::from([
                (
                    (CryptoCurrency::Nim, policy.nim_placeholder_address.clone()),
                    address_quota(reference, 800.0),
                ),
                (
                    (CryptoCurrency::Btc, policy.btc_placeholder_address.clone()),
                    address_quota(reference, 400.0),
                ),
            ]),
            queried: Mutex::new(Vec::new()),
        };

        let resolver = LimitsResolver::new(&provider, &policy);
        let limits = resolver
            .resolve(&QuotaRequest::default(), 0.0, f64::INFINITY)
            .await
            .unwrap();

        assert_eq!(provider.queried.lock().unwrap().len(), 2);
        // Placeholder current/remaining figures never bind
        assert_eq!(limits.current.usd, 200.0);
        assert_eq!(limits.remaining.usd, 200.0);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let policy = LimitsPolicy::default();
        let provider = StaticProvider {
            account: None,
            addresses: HashMap::new(),
            queried: Mutex::new(Vec::new()),
        };

        let resolver = LimitsResolver::new(&provider, &policy);
        let result = resolver
            .resolve(&QuotaRequest::default(), 0.0, f64::INFINITY)
            .await;
        assert!(result.is_err());
    }
}
