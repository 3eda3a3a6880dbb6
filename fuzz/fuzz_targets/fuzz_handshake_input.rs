#![no_main]

//! Feeds arbitrary datagrams straight into a handshake session.

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::Duration;

use dimux::{Config, CryptoEngine, DtlsEngine, IdentityMaterial, Role};

fuzz_target!(|data: &[u8]| {
    let config = Arc::new(
        Config::builder()
            .pre_shared_keys(true)
            .rng_seed(Some(1))
            .build()
            .expect("config"),
    );
    let engine = DtlsEngine::new(config);
    let identity = IdentityMaterial::pre_shared_key(b"fuzz");

    for role in [Role::Server, Role::Client] {
        let Ok(mut session) = engine.create_session(role, 1024, &identity) else {
            return;
        };

        let _ = session.advance_handshake(Duration::from_millis(1));
        let _ = session.write_input(data);
        let _ = session.advance_handshake(Duration::from_millis(2));
        let _ = session.drain_pending_output();
        let _ = session.decrypt(data);
    }
});
