//! 会话管理
//!
//! At most one `EnclaveSession` exists per controller. It is dropped on lock,
//! auto-lock, background or reset, which also drops the session PIN.

use crate::security::secret::SessionPin;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
pub struct EnclaveSession {
    id: Uuid,
    unlocked_at: Instant,
    expires_at: Instant,
    idle_timeout: Duration,
    biometric_satisfied: bool,
    /// `None` for a decoy session: nothing can be decrypted or persisted.
    pin: Option<SessionPin>,
}

impl EnclaveSession {
    pub fn new(pin: Option<SessionPin>, idle_timeout: Duration, biometric_satisfied: bool) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            unlocked_at: now,
            expires_at: now + idle_timeout,
            idle_timeout,
            biometric_satisfied,
            pin,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unlocked_at(&self) -> Instant {
        self.unlocked_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn biometric_satisfied(&self) -> bool {
        self.biometric_satisfied
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Pushes the expiry out by the idle timeout.
    pub fn touch(&mut self) {
        self.expires_at = Instant::now() + self.idle_timeout;
    }

    pub(crate) fn pin(&self) -> Option<&SessionPin> {
        self.pin.as_ref()
    }
}
