//! Esplora REST client (mempool.space / blockstream.info compatible)

use super::bitcoin::utxo::{Utxo, UtxoStatus};
use super::traits::{ChainDataProvider, FeeEstimate};
use crate::core::config::ProviderConfig;
use crate::core::errors::WalletError;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Floor used when the estimate map lacks a target.
const MIN_RELAY_FEE: f64 = 1.0;

#[derive(Debug, Deserialize)]
struct AddressStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: AddressStats,
    mempool_stats: AddressStats,
}

#[derive(Debug, Deserialize)]
struct TxStatus {
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: TxStatus,
}

pub struct EsploraProvider {
    base_url: String,
    http_client: HttpClient,
}

impl EsploraProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, WalletError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| WalletError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self { base_url: config.base_url.trim_end_matches('/').to_string(), http_client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, WalletError> {
        let response = self
            .http_client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, path));
        }
        response
            .json()
            .await
            .map_err(|e| WalletError::NetworkError(format!("GET {}: bad response body: {}", path, e)))
    }
}

/// 4xx means the request itself is wrong; anything else may succeed on retry.
fn status_error(status: StatusCode, path: &str) -> WalletError {
    if status.is_client_error() {
        WalletError::ValidationError(format!("{} rejected with HTTP {}", path, status.as_u16()))
    } else {
        WalletError::NetworkError(format!("{} failed with HTTP {}", path, status.as_u16()))
    }
}

#[async_trait]
impl ChainDataProvider for EsploraProvider {
    async fn get_balance(&self, address: &str) -> Result<u64, WalletError> {
        let info: AddressInfo = self.get_json(&format!("/address/{}", address)).await?;
        let confirmed = info.chain_stats.funded_txo_sum as i128 - info.chain_stats.spent_txo_sum as i128;
        let pending = info.mempool_stats.funded_txo_sum as i128 - info.mempool_stats.spent_txo_sum as i128;
        let balance = (confirmed + pending).max(0) as u64;
        debug!(balance, "fetched balance");
        Ok(balance)
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, WalletError> {
        let raw: Vec<EsploraUtxo> = self.get_json(&format!("/address/{}/utxo", address)).await?;
        let utxos = raw
            .into_iter()
            .map(|u| {
                let mut utxo = Utxo::new(u.txid, u.vout, u.value, address);
                utxo.status = if u.status.confirmed { UtxoStatus::Confirmed } else { UtxoStatus::Pending };
                utxo
            })
            .collect::<Vec<_>>();
        debug!(count = utxos.len(), "fetched UTXOs");
        Ok(utxos)
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, WalletError> {
        let targets: HashMap<String, f64> = self.get_json("/fee-estimates").await?;
        let pick = |target: &str| {
            targets.get(target).copied().filter(|r| r.is_finite() && *r > 0.0).unwrap_or_else(|| {
                warn!(target, "fee target missing from estimate, using relay minimum");
                MIN_RELAY_FEE
            })
        };
        Ok(FeeEstimate { fastest: pick("1"), half_hour: pick("3"), hour: pick("6"), economy: pick("144") })
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, WalletError> {
        let response = self
            .http_client
            .post(self.url("/tx"))
            .header("content-type", "text/plain")
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("broadcast failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WalletError::NetworkError(format!("broadcast response: {}", e)))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "broadcast rejected");
            return match status_error(status, "/tx") {
                WalletError::ValidationError(msg) => {
                    Err(WalletError::ValidationError(format!("{}: {}", msg, body.trim())))
                }
                other => Err(other),
            };
        }

        let txid = body.trim().to_string();
        info!(%txid, "transaction broadcast");
        Ok(txid)
    }

    fn name(&self) -> &str {
        "esplora"
    }
}
