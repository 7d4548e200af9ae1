// Lock / unlock state machine, end to end over the in-memory keystore.

mod common;

use common::{cheap_kdf, test_config, Harness, ABANDON, ABANDON_BTC, PIN};
use sovereign_enclave::auth::EnclavePhase;
use sovereign_enclave::core::domain::{AppState, Chain, Network, WalletConfig};
use sovereign_enclave::core::errors::WalletError;
use sovereign_enclave::events::{EnclaveEvent, LockReason};
use sovereign_enclave::security::vault::{VaultBlob, VaultCodec};
use sovereign_enclave::signing::SignRequest;
use sovereign_enclave::storage::{AccessOptions, MemorySecureStorage, SecureStorage};
use std::sync::Arc;
use std::time::Duration;

fn drain(events: &mut tokio::sync::broadcast::Receiver<EnclaveEvent>) -> Vec<EnclaveEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn stored_state(storage: &MemorySecureStorage, pin: &str) -> (VaultBlob, AppState) {
    let raw = storage.peek("enclave_state").expect("state stored");
    let blob = VaultBlob::from_json(&raw).unwrap();
    let plaintext = VaultCodec::new(cheap_kdf()).decrypt(&blob, pin).unwrap();
    (blob, serde_json::from_slice(&plaintext).unwrap())
}

#[tokio::test]
async fn test_onboarding_then_reopen_starts_locked() {
    let storage = Arc::new(MemorySecureStorage::new());
    let h = Harness::web(storage.clone()).await;
    assert_eq!(h.controller.phase(), EnclavePhase::NoVault);
    assert!(matches!(h.controller.begin_unlock(), Err(WalletError::NotAuthorized(_))));

    let roots = h.controller.create_vault(ABANDON, "", PIN, Network::Mainnet).await.unwrap();
    assert_eq!(roots.bitcoin, ABANDON_BTC);
    h.controller.teardown().await;

    let (_, persisted) = stored_state(&storage, PIN);
    let config = persisted.wallet_config.unwrap();
    assert!(config.seed_vault.is_some());
    assert!(!config.has_plaintext_secret());

    let reopened = Harness::web(storage).await;
    assert_eq!(reopened.controller.phase(), EnclavePhase::Locked);
    reopened.controller.unlock(PIN).await.unwrap();
    let roots = reopened.controller.wallet_config().unwrap().unwrap().roots.unwrap();
    assert_eq!(roots.bitcoin, ABANDON_BTC);
}

#[tokio::test]
async fn test_duress_pin_unlocks_decoy() {
    let h = Harness::onboarded_web().await;
    h.controller.set_duress_pin(Some("000000")).await.unwrap();
    h.controller.lock().await;

    let mut events = h.events.subscribe();
    h.controller.unlock("000000").await.unwrap();
    assert_eq!(h.controller.phase(), EnclavePhase::Unlocked);
    assert_eq!(drain(&mut events), vec![EnclaveEvent::Unlocked]);
    assert_eq!(h.controller.app_state().unwrap(), AppState::default());
    assert!(h.controller.wallet_config().unwrap().is_none());

    // nothing the decoy session does reaches storage
    let writes = h.storage.write_count();
    h.controller.update_state(|s| s.privacy_mode = true).unwrap();
    h.controller.set_duress_pin(None).await.unwrap();
    let err = h
        .dispatcher
        .sign(SignRequest::message(Chain::Bitcoin, b"hello".to_vec(), "decoy"))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::NotAuthorized(_)));
    h.controller.lock().await;
    assert_eq!(h.storage.write_count(), writes);

    h.controller.unlock(PIN).await.unwrap();
    let real = h.controller.app_state().unwrap();
    assert!(!real.privacy_mode);
    assert_eq!(real.wallet_config.unwrap().roots.unwrap().bitcoin, ABANDON_BTC);

    // the duress PIN survived the decoy session
    h.controller.lock().await;
    h.controller.unlock("000000").await.unwrap();
    assert!(h.controller.wallet_config().unwrap().is_none());
}

#[tokio::test]
async fn test_policy_record_shape_does_not_reveal_duress() {
    let h = Harness::onboarded_web().await;
    let without: serde_json::Value = serde_json::from_str(&h.storage.peek("enclave_policy").unwrap()).unwrap();
    h.controller.set_duress_pin(Some("9999")).await.unwrap();
    let with: serde_json::Value = serde_json::from_str(&h.storage.peek("enclave_policy").unwrap()).unwrap();

    let keys = |v: &serde_json::Value| v["duress"].as_object().unwrap().keys().cloned().collect::<Vec<_>>();
    assert_eq!(keys(&without), keys(&with));
    assert_ne!(without["duress"]["digest"], with["duress"]["digest"]);
}

#[tokio::test]
async fn test_biometric_gate_precedes_pin() {
    let storage = Arc::new(MemorySecureStorage::with_biometrics(Duration::from_secs(300)));
    let h = Harness::web(storage.clone()).await;
    h.controller.create_vault(ABANDON, "", PIN, Network::Mainnet).await.unwrap();
    h.controller.set_biometric_required(true).await.unwrap();
    h.controller.lock().await;

    assert_eq!(h.controller.begin_unlock().unwrap(), EnclavePhase::BiometricPending);
    assert!(matches!(h.controller.unlock(PIN).await, Err(WalletError::NotAuthorized(_))));

    // failed scans never consume PIN attempts (max_pin_attempts = 3)
    storage.set_biometric_outcome(false);
    for _ in 0..5 {
        assert!(!h.controller.authenticate_biometric().await.unwrap());
        assert_eq!(h.controller.phase(), EnclavePhase::BiometricPending);
    }

    storage.set_biometric_outcome(true);
    assert!(h.controller.authenticate_biometric().await.unwrap());
    assert_eq!(h.controller.phase(), EnclavePhase::PinEntry);
    h.controller.unlock(PIN).await.unwrap();
    assert!(h.controller.app_state().unwrap().security.biometric_unlock);
}

#[tokio::test]
async fn test_biometric_requires_sensor() {
    let h = Harness::onboarded_web().await;
    assert!(matches!(
        h.controller.set_biometric_required(true).await,
        Err(WalletError::ValidationError(_))
    ));
    assert!(!h.controller.biometric_required());
}

#[tokio::test]
async fn test_wrong_pin_lockout() {
    let mut config = test_config();
    config.security.lockout_secs = 1;
    let storage = Arc::new(MemorySecureStorage::new());
    let h = Harness::open(config, storage, None).await;
    h.controller.create_vault(ABANDON, "", PIN, Network::Mainnet).await.unwrap();
    h.controller.lock().await;

    assert!(matches!(h.controller.unlock("1111").await, Err(WalletError::DecryptionError)));
    assert_eq!(h.controller.phase(), EnclavePhase::PinEntry);
    assert!(matches!(h.controller.unlock("2222").await, Err(WalletError::DecryptionError)));
    assert!(matches!(h.controller.unlock("3333").await, Err(WalletError::RateLimited { .. })));
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);

    // even the right PIN is refused until the lockout ends
    assert!(matches!(h.controller.unlock(PIN).await, Err(WalletError::RateLimited { .. })));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.controller.unlock(PIN).await.unwrap();
    assert!(h.controller.is_unlocked());
}

#[tokio::test]
async fn test_malformed_pin_is_not_an_attempt() {
    let h = Harness::onboarded_web().await;
    h.controller.lock().await;
    for _ in 0..5 {
        assert!(matches!(h.controller.unlock("12ab").await, Err(WalletError::ValidationError(_))));
    }
    h.controller.unlock(PIN).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_unlocks_serialize() {
    let h = Harness::onboarded_web().await;
    h.controller.lock().await;
    let mut events = h.events.subscribe();

    let (a, b) = tokio::join!(h.controller.unlock(PIN), h.controller.unlock(PIN));
    a.unwrap();
    b.unwrap();
    assert!(h.controller.is_unlocked());
    assert_eq!(drain(&mut events), vec![EnclaveEvent::Unlocked]);
}

#[tokio::test]
async fn test_abandoned_unlock_returns_to_rest() {
    let h = Harness::onboarded_web().await;
    h.controller.lock().await;
    assert_eq!(h.controller.begin_unlock().unwrap(), EnclavePhase::PinEntry);

    // the 10ms attempt delay outlasts the caller's 1ms budget
    let abandoned = tokio::time::timeout(Duration::from_millis(1), h.controller.unlock(PIN)).await;
    assert!(abandoned.is_err());
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);
    assert_eq!(h.controller.cancel_prompt(), EnclavePhase::Locked);
    assert_eq!(h.controller.begin_unlock().unwrap(), EnclavePhase::PinEntry);

    h.controller.unlock(PIN).await.unwrap();
    assert!(h.controller.is_unlocked());
}

#[tokio::test]
async fn test_cancel_discards_unlock_in_flight() {
    let h = Harness::onboarded_web().await;
    h.controller.lock().await;
    let mut events = h.events.subscribe();

    let controller = h.controller.clone();
    let pending = tokio::spawn(async move { controller.unlock(PIN).await });
    while h.controller.phase() != EnclavePhase::Unlocking {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.controller.cancel_prompt(), EnclavePhase::Locked);

    assert!(matches!(pending.await.unwrap(), Err(WalletError::NotAuthorized(_))));
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);
    assert!(drain(&mut events).is_empty());
    h.controller.unlock(PIN).await.unwrap();
}

#[tokio::test]
async fn test_duress_unlock_reads_like_a_real_one() {
    let h = Harness::onboarded_native().await;
    h.controller.set_duress_pin(Some("000000")).await.unwrap();
    h.controller.lock().await;

    let before = h.storage.read_count();
    h.controller.unlock(PIN).await.unwrap();
    let real_reads = h.storage.read_count() - before;
    h.controller.lock().await;

    let before = h.storage.read_count();
    h.controller.unlock("000000").await.unwrap();
    assert_eq!(h.storage.read_count() - before, real_reads);
    assert!(!h.element.as_ref().unwrap().has_session());
}

#[tokio::test(start_paused = true)]
async fn test_auto_lock_invalidates_native_session() {
    let h = Harness::onboarded_native().await;
    let element = h.element.clone().unwrap();
    assert!(element.has_session());
    let mut events = h.events.subscribe();

    tokio::time::advance(Duration::from_secs(4 * 60)).await;
    h.controller.record_activity();
    tokio::time::advance(Duration::from_secs(4 * 60)).await;
    tokio::task::yield_now().await;
    assert!(h.controller.is_unlocked());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(events.recv().await.unwrap(), EnclaveEvent::Locked { reason: LockReason::AutoLock });
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);
    assert!(!element.has_session());
    assert!(element.sessions_cleared() >= 1);
    assert!(matches!(h.controller.signing_context(), Err(WalletError::NotAuthorized(_))));
}

#[tokio::test]
async fn test_background_locks() {
    let h = Harness::onboarded_web().await;
    let mut events = h.events.subscribe();
    h.controller.app_backgrounded().await;
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);
    assert_eq!(drain(&mut events), vec![EnclaveEvent::Locked { reason: LockReason::Background }]);
}

#[tokio::test]
async fn test_legacy_vault_upgraded_on_unlock() {
    let storage = Arc::new(MemorySecureStorage::new());
    let codec = VaultCodec::new(cheap_kdf());
    let legacy_state = AppState {
        wallet_config: Some(WalletConfig {
            mnemonic: Some(ABANDON.to_string()),
            passphrase: Some(String::new()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let blob = codec.encrypt_legacy(&serde_json::to_vec(&legacy_state).unwrap(), PIN).unwrap();
    storage
        .set("enclave_state", &blob.to_json().unwrap(), AccessOptions::default())
        .await
        .unwrap();

    let h = Harness::web(storage.clone()).await;
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);
    let mut events = h.events.subscribe();
    h.controller.unlock(PIN).await.unwrap();

    let seen = drain(&mut events);
    assert!(matches!(seen.first(), Some(EnclaveEvent::VaultUpgraded { .. })));
    assert_eq!(seen.last(), Some(&EnclaveEvent::Unlocked));

    let (stored, persisted) = stored_state(&storage, PIN);
    assert!(!stored.is_legacy());
    let config = persisted.wallet_config.unwrap();
    assert!(!config.has_plaintext_secret());
    assert!(config.seed_vault.as_ref().is_some_and(|v| !v.is_legacy()));

    let live = h.controller.wallet_config().unwrap().unwrap();
    assert!(!live.has_plaintext_secret());
    let signed = h
        .dispatcher
        .sign(SignRequest::message(Chain::Bitcoin, b"migrated".to_vec(), "check"))
        .await
        .unwrap();
    assert!(signed.broadcast_ready_hex.is_none());
}

#[tokio::test]
async fn test_lock_lets_pending_write_finish() {
    let h = Harness::onboarded_web().await;
    h.controller.update_state(|s| s.privacy_mode = true).unwrap();
    h.controller.lock().await;
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);

    h.controller.unlock(PIN).await.unwrap();
    assert!(h.controller.app_state().unwrap().privacy_mode);
}

#[tokio::test]
async fn test_every_write_is_sanitized() {
    let h = Harness::onboarded_web().await;
    for round in 0..2 {
        h.controller
            .update_state(|s| {
                let config = s.wallet_config.get_or_insert_with(WalletConfig::default);
                config.mnemonic = Some(ABANDON.to_string());
                s.ui = serde_json::json!({ "round": round });
            })
            .unwrap();
        h.controller.lock().await;
        h.controller.unlock(PIN).await.unwrap();

        let (_, persisted) = stored_state(&h.storage, PIN);
        assert_eq!(persisted.ui, serde_json::json!({ "round": round }));
        assert!(!persisted.wallet_config.unwrap().has_plaintext_secret());
    }
}

#[tokio::test]
async fn test_reset_wallet_destroys_everything() {
    let h = Harness::onboarded_web().await;
    let mut events = h.events.subscribe();
    h.controller.reset_wallet().await.unwrap();

    assert_eq!(h.controller.phase(), EnclavePhase::NoVault);
    assert!(h.storage.peek("enclave_state").is_none());
    assert!(h.storage.peek("enclave_policy").is_none());
    assert_eq!(
        drain(&mut events),
        vec![EnclaveEvent::Locked { reason: LockReason::Reset }, EnclaveEvent::VaultReset]
    );

    h.controller.create_vault(ABANDON, "", "5678", Network::Testnet).await.unwrap();
    assert!(h.controller.is_unlocked());
}

#[tokio::test]
async fn test_reset_from_decoy_keeps_real_vault() {
    let h = Harness::onboarded_web().await;
    h.controller.set_duress_pin(Some("000000")).await.unwrap();
    h.controller.lock().await;
    h.controller.unlock("000000").await.unwrap();

    let sealed_state = h.storage.peek("enclave_state");
    let policy = h.storage.peek("enclave_policy");
    let writes = h.storage.write_count();
    let mut events = h.events.subscribe();
    h.controller.reset_wallet().await.unwrap();

    // same surface as a real reset
    assert_eq!(h.controller.phase(), EnclavePhase::NoVault);
    assert_eq!(
        drain(&mut events),
        vec![EnclaveEvent::Locked { reason: LockReason::Reset }, EnclaveEvent::VaultReset]
    );
    assert!(matches!(h.controller.begin_unlock(), Err(WalletError::NotAuthorized(_))));
    assert!(matches!(h.controller.unlock("4321").await, Err(WalletError::NotAuthorized(_))));
    assert_eq!(h.controller.phase(), EnclavePhase::NoVault);

    // onboarding on top of it never reaches storage
    h.controller.create_vault(ABANDON, "", "5678", Network::Testnet).await.unwrap();
    assert!(h.controller.is_unlocked());
    h.controller.lock().await;
    assert_eq!(h.controller.phase(), EnclavePhase::NoVault);

    assert_eq!(h.storage.peek("enclave_state"), sealed_state);
    assert_eq!(h.storage.peek("enclave_policy"), policy);
    assert_eq!(h.storage.write_count(), writes);

    h.controller.unlock(PIN).await.unwrap();
    let roots = h.controller.wallet_config().unwrap().unwrap().roots.unwrap();
    assert_eq!(roots.bitcoin, ABANDON_BTC);
    h.controller.lock().await;
    assert_eq!(h.controller.phase(), EnclavePhase::Locked);
}

#[tokio::test]
async fn test_locked_operations_are_refused() {
    let h = Harness::onboarded_web().await;
    h.controller.lock().await;
    assert!(matches!(h.controller.app_state(), Err(WalletError::NotAuthorized(_))));
    assert!(matches!(h.controller.update_state(|_| {}), Err(WalletError::NotAuthorized(_))));
    assert!(matches!(h.controller.set_duress_pin(Some("0000")).await, Err(WalletError::NotAuthorized(_))));
    assert!(matches!(h.controller.reset_wallet().await, Err(WalletError::NotAuthorized(_))));
}
