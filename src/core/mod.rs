//! Core domain types and collaborator abstractions

pub mod cache;
pub mod config;
pub mod currency;
pub mod error;
pub mod log;
pub mod quota;
pub mod transaction;

// Re-export main types for cleaner imports
pub use currency::{
    CryptoCurrency, ExchangeRateProvider, ExchangeRates, FiatCurrency, FiatValues, PriceHistory,
    PriceHistoryProvider,
};
pub use error::LimitsError;
pub use quota::{AccountQuota, AddressQuota, LimitsProvider, Quota};
pub use transaction::{
    BtcInput, BtcOutput, BtcTransaction, NimTransaction, SwapAsset, SwapIndex, SwapRecord,
    TransactionStore,
};
