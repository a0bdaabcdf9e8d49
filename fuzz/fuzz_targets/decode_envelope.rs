#![no_main]

use libfuzzer_sys::fuzz_target;
use phivault::Envelope;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(env) = Envelope::decode(text) {
        // Anything accepted must survive a re-encode unchanged.
        assert_eq!(Envelope::decode(&env.encode()).ok(), Some(env));
    }
});
