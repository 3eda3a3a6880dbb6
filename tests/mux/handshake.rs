//! Handshake convergence and authentication failures.

use std::time::Duration;

use dimux::{ChannelState, PacketError};

use crate::common::*;

#[test]
fn psk_handshake_converges() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"correct horse", b"correct horse");
    enable_both(&mut client, &mut server);

    let rounds = handshake(&mut client, &mut server);
    assert!(rounds <= 3, "took {} rounds", rounds);

    assert!(client.is_encryption_enabled());
    assert!(server.is_encryption_enabled());
}

#[test]
fn certificate_handshake_converges() {
    init_logging();

    let (mut client, mut server) = cert_pair(BUDGET);
    enable_both(&mut client, &mut server);

    let rounds = handshake(&mut client, &mut server);
    assert!(rounds <= 3, "took {} rounds", rounds);
}

#[test]
fn handshake_packets_are_flagged() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);

    client.tick(Duration::from_millis(10));
    let sent = &client.transport().sent;
    assert_eq!(sent.len(), 1, "ClientHello in one packet");
    assert_eq!(sent[0].get(0), Some(true), "encrypted bit");
    assert_eq!(sent[0].get(1), Some(true), "handshake bit");
}

#[test]
fn small_budget_fragments_certificate() {
    //! A budget barely above the reserve forces the certificate flight into
    //! many fragments, all within the budget (checked by the Wire).
    init_logging();

    let budget = 1500;
    let (mut client, mut server) = cert_pair(budget);
    enable_both(&mut client, &mut server);

    client.tick(Duration::from_millis(10));
    for r in deliver(&mut client, &mut server) {
        r.expect("server incoming");
    }
    server.tick(Duration::from_millis(10));
    assert!(
        server.transport().sent.len() > 2,
        "server flight should span several packets"
    );

    for r in deliver(&mut server, &mut client) {
        r.expect("client incoming");
    }
    handshake(&mut client, &mut server);

    let payload = pattern(client.max_payload_bits() as usize - 8);
    assert_eq!(roundtrip(&mut client, &mut server, &payload), payload);
}

#[test]
fn psk_mismatch_fails_both_sides() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"alpha", b"bravo");
    enable_both(&mut client, &mut server);

    step(&mut client, &mut server, Duration::from_millis(10));
    step(&mut client, &mut server, Duration::from_millis(10));

    // Client cannot verify the server Finished.
    assert_eq!(client.state(), ChannelState::Unencrypted);
    assert!(!client.is_encryption_enabled());

    // Server never sees a Finished and runs into the handshake timeout.
    assert_eq!(server.state(), ChannelState::Handshaking);
    for _ in 0..12 {
        server.tick(Duration::from_secs(1));
        drop_sent(&mut server);
    }
    assert_eq!(server.state(), ChannelState::Unencrypted);
}

#[test]
fn fingerprint_mismatch_fails_client() {
    init_logging();

    let (mut client, mut server) = cert_pair_with(BUDGET, |fp| fp[31] ^= 0x01);
    enable_both(&mut client, &mut server);

    step(&mut client, &mut server, Duration::from_millis(10));
    client.tick(Duration::from_millis(10));

    assert_eq!(client.state(), ChannelState::Unencrypted);
    assert_eq!(server.state(), ChannelState::Handshaking);
}

#[test]
fn mode_mismatch_fails_server() {
    //! A pre-shared key client against a certificate server.
    init_logging();

    let (mut client, _) = psk_pair(BUDGET, b"k", b"k");
    let (_, mut server) = cert_pair(BUDGET);
    enable_both(&mut client, &mut server);

    client.tick(Duration::from_millis(10));
    for r in deliver(&mut client, &mut server) {
        r.expect("server incoming");
    }
    server.tick(Duration::from_millis(10));

    assert_eq!(server.state(), ChannelState::Unencrypted);
    assert!(server.transport().sent.is_empty());
}

#[test]
fn renegotiate_after_disable() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    client.disable_encryption();
    server.disable_encryption();
    assert_eq!(client.state(), ChannelState::Unencrypted);

    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    let payload = pattern(77);
    assert_eq!(roundtrip(&mut server, &mut client, &payload), payload);
}

#[test]
fn handshake_packet_after_completion_is_dropped() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);

    client.tick(Duration::from_millis(10));
    let hello = client.transport().sent[0].clone();
    for r in deliver(&mut client, &mut server) {
        r.expect("server incoming");
    }
    server.tick(Duration::from_millis(10));
    for r in deliver(&mut server, &mut client) {
        r.expect("client incoming");
    }
    handshake(&mut client, &mut server);

    let result = server.process_incoming(hello);
    assert!(matches!(result, Ok(None)));
    assert_eq!(server.state(), ChannelState::Encrypted);
}

#[test]
fn garbage_handshake_input_is_per_packet() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);

    // encrypted=1, is_handshake=1, then bytes that are no record
    let mut packet = dimux::BitBuf::new();
    packet.push(true);
    packet.push(true);
    packet.extend_from_bytes(&[0x16, 0xFE, 0xFD, 0x00]);

    let result = server.process_incoming(packet);
    assert!(matches!(result, Err(PacketError::InputRejected(_))));
    assert_eq!(server.state(), ChannelState::Handshaking);

    handshake(&mut client, &mut server);
}
