//! Conversion between USD figures and ledger base units.

use crate::core::AddressQuota;

/// USD value of one base unit of a ledger, derived from that ledger's own
/// address quota response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitRate {
    usd_per_unit: f64,
}

impl UnitRate {
    /// `reference.monthly` is in USD cents, `native.monthly` in base units.
    pub fn from_quota(quota: &AddressQuota) -> Self {
        Self {
            usd_per_unit: quota.reference.monthly / 100.0 / quota.native.monthly,
        }
    }

    pub fn usd_per_unit(&self) -> f64 {
        self.usd_per_unit
    }

    /// Converts a USD amount into whole base units, rounding down.
    pub fn to_native(&self, usd: f64) -> u64 {
        if !self.usd_per_unit.is_finite() || self.usd_per_unit <= 0.0 || usd.is_nan() || usd <= 0.0 {
            return 0;
        }
        let units = (usd / self.usd_per_unit).floor();
        // Saturates for unbounded inputs
        units as u64
    }
}
