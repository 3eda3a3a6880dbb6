//! Configuration errors, identity handling and malformed frames.

use std::sync::Arc;
use std::time::Duration;

use dimux::{
    BitBuf, ChannelState, DtlsEngine, Error, IdentityMaterial, Multiplexer, PacketError, Role,
    FINGERPRINT_LENGTH,
};

use crate::common::*;

#[test]
fn enable_without_identity() {
    init_logging();

    let config = config(true);
    let engine = Arc::new(DtlsEngine::new(Arc::clone(&config)));
    let mut mux = Multiplexer::new(Role::Client, config, engine, Wire::new(BUDGET));

    assert!(matches!(mux.enable_encryption(), Err(Error::MissingIdentity)));
    assert_eq!(mux.state(), ChannelState::Unencrypted);
    assert!(!mux.is_encryption_enabled());
}

#[test]
fn enable_with_budget_below_reserve() {
    init_logging();

    let (mut client, _) = psk_pair(200, b"k", b"k");
    let err = client.enable_encryption().unwrap_err();
    assert!(matches!(
        err,
        Error::BudgetTooSmall {
            budget: 200,
            reserved: 242
        }
    ));
    assert_eq!(client.state(), ChannelState::Unencrypted);
}

#[test]
fn enable_with_unknown_certificate_can_retry() {
    init_logging();

    let (_, mut server) = cert_pair(BUDGET);
    server
        .set_encryption_data(&[], &[], "missing")
        .expect("cert id");

    assert!(matches!(
        server.enable_encryption(),
        Err(Error::UnknownCertificate(_))
    ));
    assert_eq!(server.state(), ChannelState::Unencrypted);

    server
        .set_encryption_data(&[], &[], "server")
        .expect("cert id");
    server.enable_encryption().expect("enable after fix");
    assert_eq!(server.state(), ChannelState::Handshaking);
}

#[test]
fn enable_twice() {
    init_logging();

    let (mut client, _) = psk_pair(BUDGET, b"k", b"k");
    client.enable_encryption().expect("enable");
    assert!(matches!(
        client.enable_encryption(),
        Err(Error::AlreadyEnabled)
    ));
    assert_eq!(client.state(), ChannelState::Handshaking);
}

#[test]
fn disable_is_idempotent() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");

    client.disable_encryption();
    assert_eq!(client.state(), ChannelState::Unencrypted);

    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    client.disable_encryption();
    let once = client.state();
    client.disable_encryption();
    assert_eq!(client.state(), once);
    assert_eq!(once, ChannelState::Unencrypted);
    assert!(!client.is_encryption_enabled());
}

#[test]
fn wrong_fingerprint_length_keeps_previous() {
    init_logging();

    let (mut client, mut server) = cert_pair(BUDGET);

    let err = client
        .set_encryption_data(&[], &[0xAB; FINGERPRINT_LENGTH - 1], "")
        .unwrap_err();
    assert!(matches!(
        err,
        Error::FingerprintLength {
            expected: FINGERPRINT_LENGTH,
            actual: 31
        }
    ));

    assert!(IdentityMaterial::fingerprint(&[0; 40]).is_err());
    assert!(matches!(
        client.set_identity(IdentityMaterial::ServerCertificateId("server".into())),
        Err(Error::IdentityMismatch("ServerCertificateId"))
    ));

    // The fingerprint set up front still pins the real server.
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);
}

#[test]
fn identity_must_fit_mode() {
    init_logging();

    let (mut client, _) = psk_pair(BUDGET, b"k", b"k");
    let err = client
        .set_identity(IdentityMaterial::ExpectedPeerFingerprint(
            [0; FINGERPRINT_LENGTH],
        ))
        .unwrap_err();
    assert!(matches!(err, Error::IdentityMismatch(_)));

    client
        .set_identity(IdentityMaterial::pre_shared_key(b"other"))
        .expect("psk fits");
}

#[test]
fn identity_change_applies_to_next_session() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);

    // Captured at enable, this does not affect the running handshake.
    client
        .set_encryption_data(b"changed", &[], "")
        .expect("set key");
    handshake(&mut client, &mut server);
}

#[test]
fn encrypted_frame_while_unencrypted() {
    init_logging();

    let (mut client, _) = psk_pair(BUDGET, b"k", b"k");

    let mut packet = BitBuf::new();
    packet.push(true);
    packet.push(false);
    packet.extend_from_bytes(&[1, 2, 3]);

    assert!(matches!(
        client.process_incoming(packet),
        Err(PacketError::InvalidState(ChannelState::Unencrypted))
    ));
}

#[test]
fn malformed_frames() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    // Empty.
    let r = server.process_incoming(BitBuf::new());
    assert!(matches!(r, Err(PacketError::Malformed(_))));

    // Encrypted bit only.
    let mut p = BitBuf::new();
    p.push(true);
    assert!(matches!(
        server.process_incoming(p),
        Err(PacketError::Malformed(_))
    ));

    // Header without a single payload byte.
    let mut p = BitBuf::new();
    p.push(true);
    p.push(false);
    for _ in 0..5 {
        p.push(true);
    }
    assert!(matches!(
        server.process_incoming(p),
        Err(PacketError::Malformed(_))
    ));

    // Bytes that are no record.
    let mut p = BitBuf::new();
    p.push(true);
    p.push(false);
    p.extend_from_bytes(&[0; 40]);
    assert!(matches!(
        server.process_incoming(p),
        Err(PacketError::Decrypt(_))
    ));

    assert_eq!(server.state(), ChannelState::Encrypted);
    let payload = pattern(33);
    assert_eq!(roundtrip(&mut client, &mut server, &payload), payload);
}

#[test]
fn trailing_transport_padding_ignored() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    let payload = pattern(21);
    let packet = client.process_outgoing(payload.clone()).unwrap().unwrap();

    // Pad to a whole number of bytes like a byte oriented transport would.
    let mut padded = packet.clone();
    while padded.len() % 8 != 0 {
        padded.push(false);
    }
    assert!(padded.len() > packet.len());

    assert_eq!(server.process_incoming(padded).unwrap(), Some(payload));
}

#[test]
fn budget_change_is_picked_up() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    let before = client.max_payload_bits();
    client.transport_mut().budget = BUDGET / 2;
    assert_eq!(client.max_payload_bits(), BUDGET / 2 - 242);
    assert!(client.max_payload_bits() < before);

    let r = client.process_outgoing(pattern((BUDGET / 2) as usize));
    assert!(matches!(r, Err(PacketError::TooLarge { .. })));
}

#[test]
fn tick_without_session_is_noop() {
    init_logging();

    let (mut client, _) = psk_pair(BUDGET, b"k", b"k");
    client.tick(Duration::from_secs(100));
    assert!(client.transport().sent.is_empty());
    assert_eq!(client.state(), ChannelState::Unencrypted);
}

#[test]
fn raised_budget_capped_by_session() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    client.transport_mut().budget = 2 * BUDGET;
    server.transport_mut().budget = 2 * BUDGET;

    // Sized at enable for BUDGET, rounded up to whole plaintext bytes.
    let max = client.max_payload_bits();
    assert!(max >= BUDGET - 242);
    assert!(max < BUDGET);

    let payload = pattern(max as usize);
    assert_eq!(roundtrip(&mut client, &mut server, &payload), payload);
    assert!(matches!(
        client.process_outgoing(pattern(max as usize + 1)),
        Err(PacketError::TooLarge { .. })
    ));

    client.disable_encryption();
    assert_eq!(client.max_payload_bits(), 2 * BUDGET - 242);
}
