#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use phivault::keystore::{KeyVaultManager, NullEventSink, VaultConfig};
use phivault::EnvelopeCipher;

static CIPHER: Lazy<EnvelopeCipher> = Lazy::new(|| {
    let keys = KeyVaultManager::from_config(&VaultConfig::development())
        .unwrap()
        .with_event_sink(Arc::new(NullEventSink));
    EnvelopeCipher::new(Arc::new(keys))
});

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Err(e) = CIPHER.decrypt(text) {
        assert!(e.is_rejected());
    }
});
