//! 访问控制
//!
//! ```text
//! auth/
//! ├── lockout.rs         # PIN 尝试限制
//! ├── session.rs         # 会话
//! └── enclave_access.rs  # 锁定/解锁状态机
//! ```

pub mod enclave_access;
pub mod lockout;
pub mod session;

pub use enclave_access::{EnclaveAccessController, EnclaveDeps, EnclavePhase, SigningContext};
pub use lockout::{LockoutConfig, PinAttemptTracker};
pub use session::EnclaveSession;
