use crate::core::currency::CryptoCurrency;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitsError {
    #[error("No HTLC output found in transaction {tx_hash}")]
    HtlcOutputNotFound { tx_hash: String },

    #[error("{matches} HTLC-like outputs in transaction {tx_hash}, expected exactly one")]
    HtlcOutputAmbiguous { tx_hash: String, matches: usize },

    #[error("No live USD rate for {0}")]
    MissingRate(CryptoCurrency),
}
