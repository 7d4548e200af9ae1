//! Bitcoin 区块链集成模块
//!
//! - SegWit (P2WPKH) address
//! - UTXO 管理
//! - PSBT 构建、finalize
//! - send planning against a chain data provider

pub mod address;
pub mod psbt;
pub mod send;
pub mod utxo;

pub use address::BitcoinAddress;
pub use psbt::{FinalizedTx, PegInParams, PsbtParams, TransactionBuilder, UnsignedTx};
pub use send::{plan_send, SendRequest};
pub use utxo::{Utxo, UtxoSelector};
