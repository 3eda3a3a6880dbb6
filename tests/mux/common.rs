//! Shared helpers for multiplexer integration tests.

#![allow(unused)]

use std::sync::Arc;
use std::time::Duration;

use dimux::certificate::CertStore;
use dimux::{
    BitBuf, ChannelState, Config, DtlsEngine, Multiplexer, PacketError, Role, Transport,
    FINGERPRINT_LENGTH,
};

/// Transport that keeps what was sent for the test to deliver.
#[derive(Debug)]
pub struct Wire {
    pub sent: Vec<BitBuf>,
    pub budget: u32,
}

impl Wire {
    pub fn new(budget: u32) -> Self {
        Wire {
            sent: Vec::new(),
            budget,
        }
    }
}

impl Transport for Wire {
    fn send_unreliable(&mut self, packet: BitBuf) {
        assert!(
            packet.len() <= self.budget as usize,
            "packet of {} bits over budget {}",
            packet.len(),
            self.budget
        );
        self.sent.push(packet);
    }

    fn max_outgoing_bits(&self) -> u32 {
        self.budget
    }
}

pub type Mux = Multiplexer<Wire>;

pub const BUDGET: u32 = 8 * 1200;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(pre_shared_keys: bool) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .pre_shared_keys(pre_shared_keys)
            .flight_start_rto(Duration::from_secs(1))
            .handshake_timeout(Duration::from_secs(10))
            .rng_seed(Some(42))
            .build()
            .expect("build config"),
    )
}

/// Client and server in pre-shared key mode, identities set, not enabled.
pub fn psk_pair(budget: u32, client_key: &[u8], server_key: &[u8]) -> (Mux, Mux) {
    let config = config(true);
    let engine = Arc::new(DtlsEngine::new(Arc::clone(&config)));

    let mut client = Multiplexer::new(
        Role::Client,
        Arc::clone(&config),
        engine.clone(),
        Wire::new(budget),
    );
    let mut server = Multiplexer::new(Role::Server, config, engine, Wire::new(budget));

    client
        .set_encryption_data(client_key, &[], "")
        .expect("client key");
    server
        .set_encryption_data(server_key, &[], "")
        .expect("server key");

    (client, server)
}

/// Client and server in certificate mode. `tamper` alters the fingerprint
/// the client pins.
pub fn cert_pair_with(
    budget: u32,
    tamper: impl FnOnce(&mut [u8; FINGERPRINT_LENGTH]),
) -> (Mux, Mux) {
    let config = config(false);

    let mut store = CertStore::new();
    let mut fingerprint = store.generate("server").expect("generate certificate");
    tamper(&mut fingerprint);

    let server_engine = Arc::new(DtlsEngine::with_certificates(Arc::clone(&config), store));
    let client_engine = Arc::new(DtlsEngine::new(Arc::clone(&config)));

    let mut client = Multiplexer::new(
        Role::Client,
        Arc::clone(&config),
        client_engine,
        Wire::new(budget),
    );
    let mut server = Multiplexer::new(Role::Server, config, server_engine, Wire::new(budget));

    client
        .set_encryption_data(&[], &fingerprint, "")
        .expect("client fingerprint");
    server
        .set_encryption_data(&[], &[], "server")
        .expect("server cert id");

    (client, server)
}

pub fn cert_pair(budget: u32) -> (Mux, Mux) {
    cert_pair_with(budget, |_| {})
}

pub fn enable_both(client: &mut Mux, server: &mut Mux) {
    client.enable_encryption().expect("client enable");
    server.enable_encryption().expect("server enable");
    assert_eq!(client.state(), ChannelState::Handshaking);
    assert_eq!(server.state(), ChannelState::Handshaking);
}

/// Feed everything `from` sent into `to`. Returns the application payloads
/// that came out.
pub fn deliver(from: &mut Mux, to: &mut Mux) -> Vec<Result<Option<BitBuf>, PacketError>> {
    let packets: Vec<BitBuf> = from.transport_mut().sent.drain(..).collect();
    packets
        .into_iter()
        .map(|p| to.process_incoming(p))
        .collect()
}

/// Drop everything `mux` sent.
pub fn drop_sent(mux: &mut Mux) -> usize {
    let n = mux.transport().sent.len();
    mux.transport_mut().sent.clear();
    n
}

/// One round: client ticks, its packets reach the server, server ticks,
/// its packets reach the client.
pub fn step(client: &mut Mux, server: &mut Mux, dt: Duration) {
    client.tick(dt);
    for r in deliver(client, server) {
        r.expect("server incoming");
    }
    server.tick(dt);
    for r in deliver(server, client) {
        r.expect("client incoming");
    }
}

/// Step until both are encrypted. Returns the number of rounds.
pub fn handshake(client: &mut Mux, server: &mut Mux) -> usize {
    for round in 1..=20 {
        step(client, server, Duration::from_millis(10));
        if client.state() == ChannelState::Encrypted && server.state() == ChannelState::Encrypted
        {
            return round;
        }
    }
    panic!(
        "no convergence: client {:?}, server {:?}",
        client.state(),
        server.state()
    );
}

/// Deterministic bit pattern of `len` bits.
pub fn pattern(len: usize) -> BitBuf {
    let mut buf = BitBuf::with_capacity(len);
    for i in 0..len {
        buf.push((i * 7 + i / 3) % 5 < 2);
    }
    buf
}

/// Send `payload` from `from` to `to` through the encrypted tunnel.
pub fn roundtrip(from: &mut Mux, to: &mut Mux, payload: &BitBuf) -> BitBuf {
    let packet = from
        .process_outgoing(payload.clone())
        .expect("outgoing")
        .expect("encrypted packet");
    assert_eq!(packet.get(0), Some(true), "encrypted bit");
    assert_eq!(packet.get(1), Some(false), "handshake bit");

    to.process_incoming(packet)
        .expect("incoming")
        .expect("payload")
}
