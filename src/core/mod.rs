pub mod config;
pub mod derivation;
pub mod domain;
pub mod errors;
pub mod seed;

pub use config::EnclaveConfig;
pub use derivation::{KeyDerivation, KeyMaterial};
pub use domain::{AppState, Chain, LnBackendConfig, Network, SovereignRoots, WalletConfig};
pub use errors::WalletError;
pub use seed::{Seed, SeedCodec};
