// src/lib.rs
//! Sovereign signing enclave.
//!
//! Derives per-chain keys from one seed, seals the seed and wallet state under a
//! PIN, builds unsigned Bitcoin transactions and dispatches signing to either a
//! platform secure element or an in-process signer.

pub mod auth;
pub mod blockchain;
pub mod core;
pub mod crypto;
pub mod events;
pub mod hardware;
pub mod logging;
pub mod persistence;
pub mod security;
pub mod signing;
pub mod storage;
pub mod tools;

pub use crate::auth::{EnclaveAccessController, EnclaveDeps, EnclavePhase};
pub use crate::core::errors::WalletError;
pub use crate::events::{EnclaveEvent, EventBus, LockReason};
pub use crate::signing::{SignRequest, SignResult, SigningDispatcher};
