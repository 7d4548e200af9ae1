//! PIN 尝试锁定机制
//!
//! 防止暴力破解 4-8 位 PIN: every attempt pays a fixed delay, and after
//! `max_attempts` consecutive failures attempts are refused until the lockout ends.

use crate::core::config::SecurityConfig;
use crate::core::errors::WalletError;
use std::time::Duration;
use tokio::time::Instant;

/// 锁定配置
#[derive(Debug, Clone, PartialEq)]
pub struct LockoutConfig {
    /// 最大failed尝试次数
    pub max_attempts: u32,
    /// 锁定持续时间
    pub lockout_duration: Duration,
    /// 每次尝试的固定延迟
    pub attempt_delay: Duration,
}

impl LockoutConfig {
    pub fn from_security(security: &SecurityConfig) -> Self {
        Self {
            max_attempts: security.max_pin_attempts,
            lockout_duration: Duration::from_secs(security.lockout_secs),
            attempt_delay: Duration::from_millis(security.pin_attempt_delay_ms),
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self::from_security(&SecurityConfig::default())
    }
}

/// Failure counter for the single enclave PIN.
#[derive(Debug)]
pub struct PinAttemptTracker {
    config: LockoutConfig,
    failed_count: u32,
    locked_until: Option<Instant>,
}

impl PinAttemptTracker {
    pub fn new(config: LockoutConfig) -> Self {
        Self { config, failed_count: 0, locked_until: None }
    }

    pub fn attempt_delay(&self) -> Duration {
        self.config.attempt_delay
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count
    }

    /// `RateLimited` while locked out. An expired lockout resets the counter.
    pub fn check(&mut self) -> Result<(), WalletError> {
        if let Some(locked_until) = self.locked_until {
            let now = Instant::now();
            if now < locked_until {
                let remaining = locked_until.duration_since(now);
                return Err(WalletError::RateLimited {
                    retry_after_secs: remaining.as_secs().max(1),
                });
            }
            self.locked_until = None;
            self.failed_count = 0;
        }
        Ok(())
    }

    /// 记录failed. Returns the remaining attempts, or `RateLimited` when this
    /// failure triggered the lockout.
    pub fn record_failure(&mut self) -> Result<u32, WalletError> {
        self.failed_count += 1;
        if self.failed_count >= self.config.max_attempts {
            self.locked_until = Some(Instant::now() + self.config.lockout_duration);
            tracing::warn!(
                attempts = self.failed_count,
                lockout_secs = self.config.lockout_duration.as_secs(),
                "PIN entry locked after too many failed attempts"
            );
            return Err(WalletError::RateLimited {
                retry_after_secs: self.config.lockout_duration.as_secs(),
            });
        }
        Ok(self.config.max_attempts - self.failed_count)
    }

    /// 记录success（重置failed计数）
    pub fn record_success(&mut self) {
        self.failed_count = 0;
        self.locked_until = None;
    }
}
