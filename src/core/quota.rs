//! Remote quota types and the quota service abstraction

use crate::core::currency::CryptoCurrency;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One quota triple. Units depend on where it appears: USD cents for
/// reference and account quotas, ledger base units for native quotas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub monthly: f64,
    pub current: f64,
    pub monthly_remaining: f64,
}

/// Address-level quota as reported by the swap service.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AddressQuota {
    #[serde(flatten)]
    pub native: Quota,
    pub reference: Quota,
}

/// Account-level quota in USD cents.
pub type AccountQuota = Quota;

#[async_trait]
pub trait LimitsProvider: Send + Sync {
    async fn get_limits(&self, asset: CryptoCurrency, address: &str) -> Result<AddressQuota>;

    /// `None` when the account has no linked identity on the quota service.
    async fn get_user_limits(&self, account_id: &str) -> Result<Option<AccountQuota>>;
}
