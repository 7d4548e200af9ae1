use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blockchain::bitcoin::utxo::Utxo;
use crate::core::errors::WalletError;

/// Fee rates in sat/vbyte for common confirmation targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// next block
    pub fastest: f64,
    /// ~3 blocks
    pub half_hour: f64,
    /// ~6 blocks
    pub hour: f64,
    /// ~144 blocks
    pub economy: f64,
}

/// Confirmation target the caller wants to pay for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePriority {
    Fastest,
    #[default]
    HalfHour,
    Hour,
    Economy,
}

impl FeeEstimate {
    pub fn rate_for(&self, priority: FeePriority) -> f64 {
        match priority {
            FeePriority::Fastest => self.fastest,
            FeePriority::HalfHour => self.half_hour,
            FeePriority::Hour => self.hour,
            FeePriority::Economy => self.economy,
        }
    }
}

/// Balance and UTXO source. Every call is fallible and network-bound; callers
/// that need bounded latency wrap it in [`crate::blockchain::resilient::ResilientProvider`].
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Confirmed plus mempool balance in satoshi.
    async fn get_balance(&self, address: &str) -> Result<u64, WalletError>;

    async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, WalletError>;

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, WalletError>;

    /// Submits a raw transaction and returns its txid.
    async fn broadcast(&self, tx_hex: &str) -> Result<String, WalletError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
