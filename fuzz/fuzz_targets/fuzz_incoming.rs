#![no_main]

//! Feeds arbitrary bit packets to a multiplexer in each channel state.
//!
//! Looks for panics in envelope decoding, handshake input and record
//! decryption. Errors are expected and ignored.

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::Duration;

use dimux::{BitBuf, Config, DtlsEngine, Multiplexer, Role, Transport};

struct Sink;

impl Transport for Sink {
    fn send_unreliable(&mut self, _packet: BitBuf) {}

    fn max_outgoing_bits(&self) -> u32 {
        8 * 1200
    }
}

fn mux(role: Role) -> Multiplexer<Sink> {
    let config = Arc::new(
        Config::builder()
            .pre_shared_keys(true)
            .rng_seed(Some(1))
            .build()
            .expect("config"),
    );
    let engine = Arc::new(DtlsEngine::new(Arc::clone(&config)));
    let mut mux = Multiplexer::new(role, config, engine, Sink);
    mux.set_encryption_data(b"fuzz", &[], "").expect("key");
    mux
}

fuzz_target!(|data: &[u8]| {
    let Some((&trim, bytes)) = data.split_first() else {
        return;
    };

    // Drop up to 7 trailing bits so odd lengths are covered.
    let bits = (bytes.len() * 8).saturating_sub((trim % 8) as usize);
    let packet = BitBuf::from_bits(bytes.to_vec(), bits);

    for role in [Role::Server, Role::Client] {
        // Unencrypted
        let mut m = mux(role);
        let _ = m.process_incoming(packet.clone());

        // Handshaking
        m.enable_encryption().expect("enable");
        m.tick(Duration::from_millis(1));
        let _ = m.process_incoming(packet.clone());
        m.tick(Duration::from_millis(1));
    }
});
