pub mod coingecko;
pub mod fastspot;
pub mod util;

pub use coingecko::CoinGeckoRateProvider;
pub use fastspot::FastspotLimitsProvider;
