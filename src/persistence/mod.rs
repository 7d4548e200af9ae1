//! Encrypted application-state persistence with debounced writes.
//!
//! Every write, debounced or immediate, goes through [`sanitize_for_persistence`]
//! and is sealed by [`VaultCodec`] before it reaches storage. Writes are serialized
//! through one background task, so a newer state can never be overwritten by an
//! older pending one. A burst of changes is coalesced into one write of the latest
//! state; the burst can postpone that write by at most `max_delay_ms`.

use crate::core::config::PersistenceConfig;
use crate::core::domain::AppState;
use crate::core::errors::WalletError;
use crate::events::{EnclaveEvent, EventBus};
use crate::security::secret::SessionPin;
use crate::security::vault::{VaultBlob, VaultCodec};
use crate::storage::{AccessOptions, SecureStorage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Copy of `state` that is safe to write: no mnemonic or passphrase, and no
/// Lightning backend that fails validation.
pub fn sanitize_for_persistence(state: &AppState) -> AppState {
    let mut clean = state.clone();
    if let Some(config) = clean.wallet_config.as_mut() {
        if config.strip_secrets() {
            debug!("stripped plaintext wallet secrets before persisting");
        }
    }
    clean.ln_backend = clean.ln_backend.sanitized();
    clean
}

/// State read back from storage.
#[derive(Debug)]
pub struct LoadedState {
    pub state: AppState,
    /// Sealed in the pre-v2 format; the caller re-seals it.
    pub legacy: bool,
}

struct PendingWrite {
    state: AppState,
    pin: SessionPin,
}

enum Command {
    Schedule(PendingWrite),
    Flush(Option<oneshot::Sender<Result<(), WalletError>>>),
    WriteNow(PendingWrite, oneshot::Sender<Result<String, WalletError>>),
    Discard(oneshot::Sender<()>),
}

/// Seals and stores one state snapshot.
struct StateWriter {
    storage: Arc<dyn SecureStorage>,
    codec: VaultCodec,
    state_key: String,
    events: EventBus,
}

impl StateWriter {
    async fn write(&self, write: PendingWrite) -> Result<String, WalletError> {
        let result = self.seal_and_store(write).await;
        if let Err(e) = &result {
            error!(error = %e, "failed to persist enclave state");
            self.events.publish(EnclaveEvent::PersistFailed { message: e.to_string() });
        }
        result
    }

    async fn seal_and_store(&self, write: PendingWrite) -> Result<String, WalletError> {
        let clean = sanitize_for_persistence(&write.state);
        let require_biometric = clean.security.biometric_unlock;
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(&clean)?);

        let codec = self.codec.clone();
        let pin = write.pin;
        let blob = tokio::task::spawn_blocking(move || codec.encrypt(&plaintext, pin.expose()))
            .await
            .map_err(|e| WalletError::InternalError(format!("encrypt task: {}", e)))??;

        self.storage
            .set(&self.state_key, &blob.to_json()?, AccessOptions { require_biometric })
            .await?;
        let fingerprint = blob.fingerprint();
        debug!(fingerprint = %fingerprint, "enclave state persisted");
        Ok(fingerprint)
    }
}

pub struct StatePersistence {
    storage: Arc<dyn SecureStorage>,
    codec: VaultCodec,
    config: PersistenceConfig,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatePersistence {
    /// Spawns the debounce task on the current tokio runtime.
    pub fn start(
        storage: Arc<dyn SecureStorage>,
        codec: VaultCodec,
        config: PersistenceConfig,
        events: EventBus,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let writer = StateWriter {
            storage: storage.clone(),
            codec: codec.clone(),
            state_key: config.state_key.clone(),
            events,
        };
        let task = tokio::spawn(debounce_loop(
            writer,
            receiver,
            cancel.clone(),
            Duration::from_millis(config.debounce_ms),
            Duration::from_millis(config.max_delay_ms.max(config.debounce_ms)),
        ));
        Self { storage, codec, config, commands, cancel, task: Mutex::new(Some(task)) }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub async fn has_state(&self) -> Result<bool, WalletError> {
        self.storage.has(&self.config.state_key).await
    }

    /// `Ok(None)` when nothing has been persisted yet. A wrong PIN or damaged blob
    /// is a `DecryptionError`.
    pub async fn load(&self, pin: &SessionPin, options: AccessOptions) -> Result<Option<LoadedState>, WalletError> {
        // a write queued by the previous session must land before we read
        if let Err(e) = self.flush().await {
            warn!(error = %e, "pending state write did not complete before load");
        }
        let Some(raw) = self.storage.get(&self.config.state_key, options).await? else {
            return Ok(None);
        };
        let blob = VaultBlob::from_json(&raw)?;
        let legacy = blob.is_legacy();

        let codec = self.codec.clone();
        let pin = pin.clone();
        let plaintext = tokio::task::spawn_blocking(move || codec.decrypt(&blob, pin.expose()))
            .await
            .map_err(|e| WalletError::InternalError(format!("decrypt task: {}", e)))??;
        // Decrypted but unparseable is still reported as a decryption failure.
        let state: AppState = serde_json::from_slice(&plaintext).map_err(|_| WalletError::DecryptionError)?;
        Ok(Some(LoadedState { state, legacy }))
    }

    /// Queues `state` for a debounced write. Only the latest queued state is written.
    pub fn schedule(&self, state: AppState, pin: SessionPin) -> Result<(), WalletError> {
        self.send(Command::Schedule(PendingWrite { state, pin }))
    }

    /// Writes immediately, superseding anything pending. Returns the new blob fingerprint.
    pub async fn persist_now(&self, state: AppState, pin: SessionPin) -> Result<String, WalletError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::WriteNow(PendingWrite { state, pin }, reply))?;
        response.await.map_err(|_| stopped())?
    }

    /// Writes the pending state, if any, and waits for it.
    pub async fn flush(&self) -> Result<(), WalletError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Flush(Some(reply)))?;
        response.await.map_err(|_| stopped())?
    }

    /// Starts writing the pending state without waiting. Used on lock.
    pub fn request_flush(&self) {
        if self.send(Command::Flush(None)).is_err() {
            debug!("flush requested after persistence stopped");
        }
    }

    /// Drops any pending write and deletes the stored state.
    pub async fn clear(&self) -> Result<(), WalletError> {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Discard(reply)).is_ok() {
            let _ = response.await;
        }
        self.storage.remove(&self.config.state_key).await
    }

    /// Flushes the pending write and stops the task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "persistence task ended abnormally");
            }
            info!("state persistence stopped");
        }
    }

    fn send(&self, command: Command) -> Result<(), WalletError> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

impl Drop for StatePersistence {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn stopped() -> WalletError {
    WalletError::InternalError("state persistence has stopped".into())
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn debounce_loop(
    writer: StateWriter,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    debounce: Duration,
    max_delay: Duration,
) {
    let mut pending: Option<PendingWrite> = None;
    // (debounce deadline, burst cap)
    let mut deadline: Option<(Instant, Instant)> = None;

    loop {
        let fire_at = deadline.map(|(quiet, cap)| quiet.min(cap));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until_opt(fire_at) => {
                deadline = None;
                if let Some(write) = pending.take() {
                    let _ = writer.write(write).await;
                }
            }
            command = receiver.recv() => match command {
                None => break,
                Some(Command::Schedule(write)) => {
                    let now = Instant::now();
                    let cap = deadline.map(|(_, cap)| cap).unwrap_or(now + max_delay);
                    deadline = Some((now + debounce, cap));
                    pending = Some(write);
                }
                Some(Command::Flush(reply)) => {
                    deadline = None;
                    let result = match pending.take() {
                        Some(write) => writer.write(write).await.map(|_| ()),
                        None => Ok(()),
                    };
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Some(Command::WriteNow(write, reply)) => {
                    deadline = None;
                    pending = None;
                    let _ = reply.send(writer.write(write).await);
                }
                Some(Command::Discard(reply)) => {
                    deadline = None;
                    pending = None;
                    let _ = reply.send(());
                }
            }
        }
    }

    if let Some(write) = pending.take() {
        debug!("flushing pending state on shutdown");
        let _ = writer.write(write).await;
    }
}
