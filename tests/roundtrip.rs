use std::sync::Arc;

use phivault::keystore::{
    InMemoryEventSink, KeyAction, KeyVaultManager, LocalDevProvider, ManualClock, RuntimeMode,
    VaultConfig,
};
use phivault::{CryptoSettings, EncryptionError, Envelope, EnvelopeCipher, FieldEncryption};
use proptest::prelude::*;

fn setup() -> EnvelopeCipher {
    let keys = KeyVaultManager::from_config(&VaultConfig::development()).unwrap();
    EnvelopeCipher::new(Arc::new(keys))
}

#[test]
fn roundtrip_basic() {
    let cipher = setup();
    let ct = cipher.encrypt("Jane Doe", Some("default")).unwrap();
    assert_eq!(cipher.decrypt(&ct).unwrap(), "Jane Doe");
}

#[test]
fn roundtrip_empty_plaintext() {
    let cipher = setup();
    assert_eq!(cipher.encrypt("", None).unwrap(), "");
    assert_eq!(cipher.decrypt("").unwrap(), "");
}

#[test]
fn roundtrip_large_plaintext() {
    let cipher = setup();
    let note = "Patient transferred via fixed wing. ".repeat(2000);
    let ct = cipher.encrypt(&note, None).unwrap();
    assert_eq!(cipher.decrypt(&ct).unwrap(), note);
}

#[test]
fn same_plaintext_different_envelopes() {
    let cipher = setup();
    let a = cipher.encrypt("1980-01-01", None).unwrap();
    let b = cipher.encrypt("1980-01-01", None).unwrap();
    assert_ne!(a, b);
}

#[test]
fn wrong_key_id_fails() {
    let cipher = setup();
    let ct = cipher.encrypt("data", Some("trips")).unwrap();
    let mut env = Envelope::decode(&ct).unwrap();
    env.key_id = "contracts".to_string();
    let result = cipher.decrypt(&env.encode());
    assert!(matches!(result, Err(EncryptionError::Rejected { .. })));
}

#[test]
fn tamper_nonce_fails() {
    let cipher = setup();
    let ct = cipher.encrypt("data", None).unwrap();
    let mut env = Envelope::decode(&ct).unwrap();
    env.nonce[0] ^= 0x01;
    assert!(cipher.decrypt(&env.encode()).unwrap_err().is_rejected());
}

#[test]
fn tamper_ciphertext_fails() {
    let cipher = setup();
    let ct = cipher.encrypt("data", None).unwrap();
    let mut env = Envelope::decode(&ct).unwrap();
    env.ciphertext[0] ^= 0x01;
    assert!(cipher.decrypt(&env.encode()).unwrap_err().is_rejected());
}

#[test]
fn tamper_tag_fails() {
    let cipher = setup();
    let ct = cipher.encrypt("data", None).unwrap();
    let mut env = Envelope::decode(&ct).unwrap();
    let last = env.ciphertext.len() - 1;
    env.ciphertext[last] ^= 0x01;
    assert!(cipher.decrypt(&env.encode()).unwrap_err().is_rejected());
}

#[test]
fn truncated_fails() {
    let cipher = setup();
    let ct = cipher.encrypt("data", None).unwrap();
    assert!(cipher.decrypt(&ct[..10]).unwrap_err().is_rejected());
    assert!(cipher.decrypt("short").unwrap_err().is_rejected());
}

#[test]
fn timestamp_does_not_affect_decryption() {
    let cipher = setup();
    let ct = cipher.encrypt("data", None).unwrap();
    let mut env = Envelope::decode(&ct).unwrap();
    env.timestamp = "not a time".to_string();
    assert_eq!(cipher.decrypt(&env.encode()).unwrap(), "data");
}

#[test]
fn key_fetched_once_across_many_values() {
    let events = InMemoryEventSink::new();
    let keys = KeyVaultManager::new(
        Arc::new(LocalDevProvider::new(RuntimeMode::Development).unwrap()),
        Default::default(),
        Arc::new(ManualClock::default()),
    )
    .with_event_sink(Arc::new(events.clone()));
    let cipher = EnvelopeCipher::new(Arc::new(keys));

    for i in 0..50 {
        let ct = cipher.encrypt(&format!("value {}", i), None).unwrap();
        cipher.decrypt(&ct).unwrap();
    }
    assert_eq!(events.count(&KeyAction::Fetched), 1);
}

#[test]
fn shared_cipher_across_threads() {
    let cipher = Arc::new(setup());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cipher = cipher.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let value = format!("thread {} value {}", t, i);
                    let ct = cipher.encrypt(&value, None).unwrap();
                    assert_eq!(cipher.decrypt(&ct).unwrap(), value);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn field_encryption_from_development_config() {
    let fe = FieldEncryption::from_config(
        &VaultConfig::development(),
        &CryptoSettings {
            search_salt: Some("integration-salt".into()),
            ..CryptoSettings::default()
        },
    )
    .unwrap();
    let sealed = fe.seal_searchable("555-0100").unwrap();
    assert!(fe.is_encrypted(&sealed.ciphertext));
    assert!(!fe.is_encrypted("555-0100"));
    assert_eq!(sealed.search_hash.len(), 64);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_roundtrip_any_string(value in "\\PC{1,200}") {
        let cipher = setup();
        let ct = cipher.encrypt(&value, None).unwrap();
        prop_assert_eq!(cipher.decrypt(&ct).unwrap(), value);
    }

    #[test]
    fn prop_search_hash_ignores_ascii_case(value in "[a-zA-Z0-9@._-]{1,64}") {
        let hasher = phivault::SearchHasher::new(Some("prop-salt".into()));
        prop_assert_eq!(
            hasher.generate_search_hash(&value.to_ascii_uppercase(), None),
            hasher.generate_search_hash(&value.to_ascii_lowercase(), None)
        );
    }

    #[test]
    fn prop_garbage_is_rejected(bytes in proptest::collection::vec(any::<u8>(), 1..256)) {
        let cipher = setup();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if let Err(e) = cipher.decrypt(&text) {
            prop_assert!(e.is_rejected());
        }
    }
}
