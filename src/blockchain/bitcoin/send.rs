//! Send planning: provider reads + coin selection + PSBT construction.

use super::psbt::{PsbtParams, TransactionBuilder, UnsignedTx};
use super::utxo::{SelectionStrategy, UtxoSelector};
use crate::blockchain::traits::{ChainDataProvider, FeePriority};
use crate::core::domain::Network;
use crate::core::errors::WalletError;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Address whose UTXOs fund the payment
    pub from_address: String,
    pub destination: String,
    pub amount_sats: u64,
    /// Defaults to `from_address`
    pub change_address: Option<String>,
    pub priority: FeePriority,
    /// Overrides the provider estimate (sat/vbyte)
    pub fee_rate: Option<f64>,
    pub rbf: bool,
    pub strategy: SelectionStrategy,
    pub network: Network,
}

impl SendRequest {
    pub fn new(
        from_address: impl Into<String>,
        destination: impl Into<String>,
        amount_sats: u64,
        network: Network,
    ) -> Self {
        Self {
            from_address: from_address.into(),
            destination: destination.into(),
            amount_sats,
            change_address: None,
            priority: FeePriority::default(),
            fee_rate: None,
            rbf: true,
            strategy: SelectionStrategy::default(),
            network,
        }
    }
}

/// Fetches UTXOs and (unless overridden) a fee rate, selects inputs and builds the
/// unsigned transaction. Nothing is signed or broadcast.
pub async fn plan_send<P>(provider: &P, request: &SendRequest) -> Result<UnsignedTx, WalletError>
where
    P: ChainDataProvider + ?Sized,
{
    let fee_rate = match request.fee_rate {
        Some(rate) => rate,
        None => provider.get_fee_estimate().await?.rate_for(request.priority),
    };
    let utxos = provider.get_utxos(&request.from_address).await?;
    let selected = UtxoSelector::select(&utxos, request.amount_sats, fee_rate, request.strategy)?;

    let change_address = request.change_address.clone().unwrap_or_else(|| request.from_address.clone());
    let unsigned = TransactionBuilder::build_psbt(&PsbtParams {
        utxos: selected,
        destination: request.destination.clone(),
        amount_sats: request.amount_sats,
        change_address,
        fee_rate,
        rbf: request.rbf,
        network: request.network,
    })?;

    info!(
        provider = provider.name(),
        inputs = unsigned.input_count,
        fee_sats = unsigned.fee_sats,
        fee_rate,
        "send planned"
    );
    Ok(unsigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::bitcoin::utxo::Utxo;
    use crate::blockchain::traits::FeeEstimate;
    use async_trait::async_trait;

    const ADDR: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const DEST: &str = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";

    struct Fixed(Vec<Utxo>);

    #[async_trait]
    impl ChainDataProvider for Fixed {
        async fn get_balance(&self, _address: &str) -> Result<u64, WalletError> {
            Ok(self.0.iter().map(|u| u.amount).sum())
        }
        async fn get_utxos(&self, _address: &str) -> Result<Vec<Utxo>, WalletError> {
            Ok(self.0.clone())
        }
        async fn get_fee_estimate(&self) -> Result<FeeEstimate, WalletError> {
            Ok(FeeEstimate { fastest: 30.0, half_hour: 10.0, hour: 5.0, economy: 1.0 })
        }
        async fn broadcast(&self, _tx_hex: &str) -> Result<String, WalletError> {
            Err(WalletError::NetworkError("offline".into()))
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn utxo(n: u8, amount: u64) -> Utxo {
        Utxo::new(format!("{:064x}", n), 0, amount, ADDR)
    }

    #[tokio::test]
    async fn test_plan_uses_priority_rate_and_skips_frozen() {
        let mut frozen = utxo(1, 5_000_000);
        frozen.is_frozen = true;
        let provider = Fixed(vec![frozen, utxo(2, 80_000), utxo(3, 30_000)]);

        let request = SendRequest::new(ADDR, DEST, 50_000, Network::Mainnet);
        let unsigned = plan_send(&provider, &request).await.unwrap();
        assert_eq!(unsigned.input_count, 1);
        assert_eq!(unsigned.total_in, 80_000);
        assert_eq!(unsigned.fee_sats, 1_400);
        assert!(unsigned.rbf);
    }

    #[tokio::test]
    async fn test_explicit_fee_rate_overrides_estimate() {
        let provider = Fixed(vec![utxo(2, 80_000)]);
        let mut request = SendRequest::new(ADDR, DEST, 50_000, Network::Mainnet);
        request.fee_rate = Some(2.0);
        assert_eq!(plan_send(&provider, &request).await.unwrap().fee_sats, 280);
    }

    #[tokio::test]
    async fn test_insufficient_funds_surfaces() {
        let provider = Fixed(vec![utxo(2, 10_000)]);
        let request = SendRequest::new(ADDR, DEST, 50_000, Network::Mainnet);
        assert!(matches!(plan_send(&provider, &request).await, Err(WalletError::InsufficientFunds(_))));
    }
}
