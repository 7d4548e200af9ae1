//! Enclave notifications
//!
//! An explicitly constructed bus handed to the controller and persistence; there is
//! no process-global instance. Events never carry secrets.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Manual,
    AutoLock,
    Background,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EnclaveEvent {
    Unlocked,
    Locked { reason: LockReason },
    VaultCreated { fingerprint: String },
    /// A legacy vault was re-sealed in the current format.
    VaultUpgraded { fingerprint: String },
    VaultReset,
    PersistFailed { message: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EnclaveEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnclaveEvent> {
        self.sender.subscribe()
    }

    /// Fire and forget. Returns how many subscribers saw the event.
    pub fn publish(&self, event: EnclaveEvent) -> usize {
        trace!(?event, "publishing enclave event");
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(EnclaveEvent::Unlocked), 0);

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(EnclaveEvent::Locked { reason: LockReason::AutoLock }), 2);
        assert_eq!(a.recv().await.unwrap(), EnclaveEvent::Locked { reason: LockReason::AutoLock });
        assert_eq!(b.recv().await.unwrap(), EnclaveEvent::Locked { reason: LockReason::AutoLock });
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(EnclaveEvent::VaultUpgraded { fingerprint: "ab".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "event": "vault_upgraded", "fingerprint": "ab" }));
    }
}
