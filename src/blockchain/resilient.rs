//! Timeout + bounded exponential backoff around any [`ChainDataProvider`].

use super::bitcoin::utxo::Utxo;
use super::traits::{ChainDataProvider, FeeEstimate};
use crate::core::errors::WalletError;
use crate::tools::async_support::{AsyncExecutor, RetryPolicy};
use async_trait::async_trait;

pub struct ResilientProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: ChainDataProvider> ResilientProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<P: ChainDataProvider> ChainDataProvider for ResilientProvider<P> {
    async fn get_balance(&self, address: &str) -> Result<u64, WalletError> {
        AsyncExecutor::retry("get_balance", &self.policy, || self.inner.get_balance(address)).await
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, WalletError> {
        AsyncExecutor::retry("get_utxos", &self.policy, || self.inner.get_utxos(address)).await
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, WalletError> {
        AsyncExecutor::retry("get_fee_estimate", &self.policy, || self.inner.get_fee_estimate()).await
    }

    /// Rebroadcasting the same transaction is harmless, so transport failures retry too.
    async fn broadcast(&self, tx_hex: &str) -> Result<String, WalletError> {
        AsyncExecutor::retry("broadcast", &self.policy, || self.inner.broadcast(tx_hex)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
