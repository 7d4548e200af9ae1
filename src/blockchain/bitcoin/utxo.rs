//! UTXO (Unspent Transaction Output) 管理
//!
//! UTXOs come from the chain data provider and are read-only to the enclave.

use super::psbt::{estimate_vbytes, fee_for};
use crate::core::errors::WalletError;
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtxoStatus {
    #[default]
    Confirmed,
    Pending,
}

/// UTXO 结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// transaction ID
    pub txid: String,
    /// 输出索引
    pub vout: u32,
    /// 金额（satoshi）
    pub amount: u64,
    /// Address that owns the output
    pub address: String,
    #[serde(default)]
    pub status: UtxoStatus,
    /// Frozen outputs are never spent
    #[serde(default)]
    pub is_frozen: bool,
}

impl Utxo {
    /// 创建新的 UTXO
    pub fn new(txid: impl Into<String>, vout: u32, amount: u64, address: impl Into<String>) -> Self {
        Self {
            txid: txid.into(),
            vout,
            amount,
            address: address.into(),
            status: UtxoStatus::Confirmed,
            is_frozen: false,
        }
    }

    /// fetch Txid
    pub fn txid(&self) -> Result<Txid, WalletError> {
        Txid::from_str(&self.txid)
            .map_err(|e| WalletError::ValidationError(format!("invalid txid {}: {}", self.txid, e)))
    }

    pub fn outpoint(&self) -> Result<OutPoint, WalletError> {
        Ok(OutPoint { txid: self.txid()?, vout: self.vout })
    }
}

/// UTXO 选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// 最大优先：优先选择金额最大的 UTXO
    #[default]
    LargestFirst,
    /// 最小优先：优先选择金额最小的 UTXO（consolidates dust）
    SmallestFirst,
}

/// UTXO 选择器
pub struct UtxoSelector;

impl UtxoSelector {
    /// Picks unfrozen outputs until they cover `target_amount` plus the fee of a
    /// two-output transaction at `fee_rate`.
    pub fn select(
        utxos: &[Utxo],
        target_amount: u64,
        fee_rate: f64,
        strategy: SelectionStrategy,
    ) -> Result<Vec<Utxo>, WalletError> {
        let mut candidates: Vec<Utxo> = utxos.iter().filter(|u| !u.is_frozen).cloned().collect();
        if candidates.is_empty() {
            return Err(WalletError::InsufficientFunds("no spendable UTXOs".to_string()));
        }

        match strategy {
            SelectionStrategy::LargestFirst => candidates.sort_by(|a, b| b.amount.cmp(&a.amount)),
            SelectionStrategy::SmallestFirst => candidates.sort_by(|a, b| a.amount.cmp(&b.amount)),
        }

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for utxo in candidates {
            total = total.saturating_add(utxo.amount);
            selected.push(utxo);
            let fee = fee_for(estimate_vbytes(selected.len(), 2), fee_rate);
            if total >= target_amount.saturating_add(fee) {
                debug!(inputs = selected.len(), total, fee, "UTXO selection complete");
                return Ok(selected);
            }
        }

        Err(WalletError::InsufficientFunds(format!(
            "spendable {} sat does not cover {} sat plus fee",
            total, target_amount
        )))
    }
}
