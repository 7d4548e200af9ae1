//! 签名请求与结果
//!
//! A `SignRequest` is one fresh authorization: it is never retried on the caller's
//! behalf once it fails.

use crate::blockchain::bitcoin::address::BitcoinAddress;
use crate::blockchain::{rootstock, stacks};
use crate::core::domain::Chain;
use crate::core::errors::WalletError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignKind {
    Transaction,
    Message,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignPayload {
    /// Unsigned Bitcoin transaction, base64 PSBT.
    Psbt { psbt_base64: String },
    /// Pre-hashed 32-byte digest, signed as-is.
    Digest([u8; 32]),
    Message(Vec<u8>),
    Event(serde_json::Value),
}

impl SignPayload {
    fn label(&self) -> &'static str {
        match self {
            SignPayload::Psbt { .. } => "psbt",
            SignPayload::Digest(_) => "digest",
            SignPayload::Message(_) => "message",
            SignPayload::Event(_) => "event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub kind: SignKind,
    pub chain: Chain,
    pub payload: SignPayload,
    /// Human-readable summary shown on the approval prompt.
    pub description: String,
}

impl SignRequest {
    pub fn psbt(psbt_base64: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: SignKind::Transaction,
            chain: Chain::Bitcoin,
            payload: SignPayload::Psbt { psbt_base64: psbt_base64.into() },
            description: description.into(),
        }
    }

    pub fn message(chain: Chain, message: impl Into<Vec<u8>>, description: impl Into<String>) -> Self {
        Self {
            kind: SignKind::Message,
            chain,
            payload: SignPayload::Message(message.into()),
            description: description.into(),
        }
    }

    pub fn digest(chain: Chain, digest: [u8; 32], description: impl Into<String>) -> Self {
        Self {
            kind: SignKind::Transaction,
            chain,
            payload: SignPayload::Digest(digest),
            description: description.into(),
        }
    }

    pub fn event(chain: Chain, event: serde_json::Value, description: impl Into<String>) -> Self {
        Self {
            kind: SignKind::Event,
            chain,
            payload: SignPayload::Event(event),
            description: description.into(),
        }
    }

    /// Rejects kind/payload/chain combinations that cannot be signed.
    pub fn validate(&self) -> Result<(), WalletError> {
        let consistent = match (&self.kind, &self.payload) {
            (SignKind::Transaction, SignPayload::Psbt { .. }) => self.chain == Chain::Bitcoin,
            (SignKind::Transaction, SignPayload::Digest(_)) => true,
            (SignKind::Message, SignPayload::Message(_) | SignPayload::Digest(_)) => true,
            (SignKind::Event, SignPayload::Event(_)) => true,
            _ => false,
        };
        if !consistent {
            return Err(WalletError::ValidationError(format!(
                "cannot sign a {} payload as a {:?} request on {}",
                self.payload.label(),
                self.kind,
                self.chain
            )));
        }
        if let SignPayload::Psbt { psbt_base64 } = &self.payload {
            if psbt_base64.trim().is_empty() {
                return Err(WalletError::ValidationError("psbt is empty".into()));
            }
        }
        Ok(())
    }

    /// The single digest to sign. PSBTs are signed per input and have no single digest.
    pub fn message_digest(&self) -> Result<[u8; 32], WalletError> {
        match &self.payload {
            SignPayload::Digest(digest) => Ok(*digest),
            SignPayload::Message(message) => Ok(match self.chain {
                Chain::Bitcoin => BitcoinAddress::message_digest(message),
                Chain::Stacks => stacks::message_digest(message),
                Chain::Rootstock => rootstock::personal_message_digest(message),
            }),
            SignPayload::Event(event) => {
                // serde_json maps keep keys sorted, so this is canonical
                let canonical = serde_json::to_vec(event)?;
                Ok(Sha256::digest(&canonical).into())
            }
            SignPayload::Psbt { .. } => Err(WalletError::ValidationError(
                "psbt requests are signed per input".into(),
            )),
        }
    }
}

/// Hex-encoded signing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    pub signature: String,
    pub public_key: String,
    /// Only set when the request carried a transaction.
    pub broadcast_ready_hex: Option<String>,
    pub txid: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
}
