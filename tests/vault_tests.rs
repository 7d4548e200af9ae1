// PIN-sealed vault format and file-backed storage.

mod common;

use common::{cheap_kdf, test_config, ABANDON, ABANDON_BTC, PIN};
use proptest::prelude::*;
use sovereign_enclave::auth::{EnclaveAccessController, EnclaveDeps, EnclavePhase};
use sovereign_enclave::core::domain::{AppState, Network};
use sovereign_enclave::core::errors::WalletError;
use sovereign_enclave::events::EventBus;
use sovereign_enclave::security::vault::{VaultBlob, VaultCodec};
use sovereign_enclave::storage::{AccessOptions, FileSecureStorage, SecureStorage};
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_round_trip_any_pin(pin in "[0-9]{4,8}", privacy in any::<bool>(), note in ".{0,40}") {
        let codec = VaultCodec::new(cheap_kdf());
        let state = AppState { privacy_mode: privacy, ui: serde_json::json!({ "note": note }), ..Default::default() };
        let plaintext = serde_json::to_vec(&state).unwrap();

        let blob = codec.encrypt(&plaintext, &pin).unwrap();
        let opened = codec.decrypt(&blob, &pin).unwrap();
        let back: AppState = serde_json::from_slice(&opened).unwrap();
        prop_assert_eq!(back, state);

        let wrong = if pin.starts_with('9') { format!("0{}", &pin[1..]) } else { format!("9{}", &pin[1..]) };
        prop_assert!(matches!(codec.decrypt(&blob, &wrong), Err(WalletError::DecryptionError)));
    }
}

#[test]
fn test_blob_json_shape() {
    let codec = VaultCodec::new(cheap_kdf());
    let blob = codec.encrypt(b"{}", "123456").unwrap();
    let json: serde_json::Value = serde_json::from_str(&blob.to_json().unwrap()).unwrap();
    assert_eq!(json["version"], 2);
    for field in ["salt", "nonce", "ciphertext"] {
        assert!(json[field].is_string(), "{} missing", field);
    }

    let legacy = codec.encrypt_legacy(b"{}", "123456").unwrap();
    let json: serde_json::Value = serde_json::from_str(&legacy.to_json().unwrap()).unwrap();
    assert!(json.get("version").is_none());
    assert!(VaultBlob::from_json(&legacy.to_json().unwrap()).unwrap().is_legacy());
    assert_eq!(&*codec.decrypt(&legacy, "123456").unwrap(), b"{}");
}

#[test]
fn test_corruption_is_indistinguishable_from_wrong_pin() {
    let codec = VaultCodec::new(cheap_kdf());
    let blob = codec.encrypt(b"secret state", PIN).unwrap();

    let mut tampered = blob.clone();
    let mut bytes = tampered.ciphertext.into_bytes();
    bytes[4] = if bytes[4] == b'A' { b'B' } else { b'A' };
    tampered.ciphertext = String::from_utf8(bytes).unwrap();

    let mut truncated = blob.clone();
    truncated.nonce = "AAAA".into();

    let wrong_pin = codec.decrypt(&blob, "4321").unwrap_err();
    assert_eq!(codec.decrypt(&tampered, PIN).unwrap_err().to_string(), wrong_pin.to_string());
    assert_eq!(codec.decrypt(&truncated, PIN).unwrap_err().to_string(), wrong_pin.to_string());
}

#[test]
fn test_pin_format_checked_first() {
    let codec = VaultCodec::new(cheap_kdf());
    for pin in ["123", "123456789", "12 34", "abcd"] {
        assert!(matches!(codec.encrypt(b"x", pin), Err(WalletError::ValidationError(_))), "{}", pin);
    }
}

#[tokio::test]
async fn test_file_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    {
        let storage: Arc<dyn SecureStorage> = Arc::new(FileSecureStorage::open(dir.path()).await.unwrap());
        assert!(!storage.is_hardware_backed());
        let controller = EnclaveAccessController::open(EnclaveDeps {
            config: config.clone(),
            storage,
            native: None,
            events: EventBus::default(),
        })
        .await
        .unwrap();
        controller.create_vault(ABANDON, "", PIN, Network::Mainnet).await.unwrap();
        controller.update_state(|s| s.privacy_mode = true).unwrap();
        controller.teardown().await;
    }

    let storage = Arc::new(FileSecureStorage::open(dir.path()).await.unwrap());
    let raw = storage.get("enclave_state", AccessOptions::default()).await.unwrap().unwrap();
    assert!(!raw.contains("abandon"));

    let controller = EnclaveAccessController::open(EnclaveDeps {
        config,
        storage,
        native: None,
        events: EventBus::default(),
    })
    .await
    .unwrap();
    assert_eq!(controller.phase(), EnclavePhase::Locked);
    controller.unlock(PIN).await.unwrap();
    let state = controller.app_state().unwrap();
    assert!(state.privacy_mode);
    assert_eq!(state.wallet_config.unwrap().roots.unwrap().bitcoin, ABANDON_BTC);
}
