//! Application data through the plaintext and encrypted channel.

use std::time::Duration;

use dimux::{BitBuf, ChannelState, PacketError};

use crate::common::*;

fn encrypted_psk_pair() -> (Mux, Mux) {
    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);
    (client, server)
}

#[test]
fn psk_roundtrip_odd_lengths() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();

    for len in [1, 7, 8, 9, 1024] {
        let payload = pattern(len);
        assert_eq!(roundtrip(&mut client, &mut server, &payload), payload);
        assert_eq!(roundtrip(&mut server, &mut client, &payload), payload);
    }
}

#[test]
fn certificate_roundtrip_odd_lengths() {
    init_logging();

    let (mut client, mut server) = cert_pair(BUDGET);
    enable_both(&mut client, &mut server);
    handshake(&mut client, &mut server);

    for len in [1, 7, 1024] {
        let payload = pattern(len);
        assert_eq!(roundtrip(&mut client, &mut server, &payload), payload);
        assert_eq!(roundtrip(&mut server, &mut client, &payload), payload);
    }
}

#[test]
fn all_zero_and_all_one_payloads() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();

    let mut zeros = BitBuf::new();
    let mut ones = BitBuf::new();
    for _ in 0..13 {
        zeros.push(false);
        ones.push(true);
    }

    assert_eq!(roundtrip(&mut client, &mut server, &zeros), zeros);
    assert_eq!(roundtrip(&mut client, &mut server, &ones), ones);
}

#[test]
fn empty_payload_roundtrip() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();
    let empty = BitBuf::new();
    assert_eq!(roundtrip(&mut client, &mut server, &empty), empty);
}

#[test]
fn plaintext_passthrough_when_disabled() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    let payload = pattern(13);

    let packet = client
        .process_outgoing(payload.clone())
        .expect("outgoing")
        .expect("packet");
    assert_eq!(packet.len(), 14);
    assert_eq!(packet.get(0), Some(false));

    let received = server.process_incoming(packet).expect("incoming");
    assert_eq!(received, Some(payload));
}

#[test]
fn plaintext_passthrough_when_encrypted() {
    //! Plaintext frames are not gated by the channel state.
    init_logging();

    let (_client, mut server) = encrypted_psk_pair();
    let payload = pattern(5);

    let mut packet = BitBuf::new();
    packet.push(false);
    packet.extend_from_bitbuf(&payload);

    assert_eq!(server.process_incoming(packet).unwrap(), Some(payload));
    assert_eq!(server.state(), ChannelState::Encrypted);
}

#[test]
fn outgoing_dropped_during_handshake() {
    init_logging();

    let (mut client, mut server) = psk_pair(BUDGET, b"k", b"k");
    enable_both(&mut client, &mut server);

    while client.state() == ChannelState::Handshaking {
        assert!(matches!(client.process_outgoing(pattern(40)), Ok(None)));
        assert!(matches!(server.process_outgoing(pattern(40)), Ok(None)));
        step(&mut client, &mut server, Duration::from_millis(10));
    }

    assert_eq!(client.state(), ChannelState::Encrypted);
    assert!(client.process_outgoing(pattern(40)).unwrap().is_some());
}

#[test]
fn no_application_ciphertext_before_encrypted() {
    init_logging();

    let (mut client, mut server) = cert_pair(BUDGET);
    enable_both(&mut client, &mut server);

    let mut seen = Vec::new();
    for _ in 0..4 {
        for mux in [&mut client, &mut server] {
            if mux.state() != ChannelState::Encrypted {
                if let Ok(Some(p)) = mux.process_outgoing(pattern(9)) {
                    seen.push(p);
                }
            }
        }

        client.tick(Duration::from_millis(10));
        seen.extend(client.transport().sent.iter().cloned());
        for r in deliver(&mut client, &mut server) {
            r.expect("server incoming");
        }
        server.tick(Duration::from_millis(10));
        seen.extend(server.transport().sent.iter().cloned());
        for r in deliver(&mut server, &mut client) {
            r.expect("client incoming");
        }
    }

    assert!(!seen.is_empty());
    for p in &seen {
        assert!(
            !(p.get(0) == Some(true) && p.get(1) == Some(false)),
            "application ciphertext before Encrypted"
        );
    }
}

#[test]
fn data_during_handshake_is_dropped() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();
    let packet = client
        .process_outgoing(pattern(30))
        .expect("outgoing")
        .expect("packet");

    // A fresh handshake on the server side.
    server.disable_encryption();
    server.enable_encryption().expect("enable");

    assert!(matches!(server.process_incoming(packet), Ok(None)));
    assert_eq!(server.state(), ChannelState::Handshaking);
}

#[test]
fn replayed_packet_rejected() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();
    let payload = pattern(100);
    let packet = client
        .process_outgoing(payload.clone())
        .expect("outgoing")
        .expect("packet");

    assert_eq!(
        server.process_incoming(packet.clone()).unwrap(),
        Some(payload)
    );

    let result = server.process_incoming(packet);
    assert!(matches!(result, Err(PacketError::Decrypt(_))));
    assert_eq!(server.state(), ChannelState::Encrypted);
}

#[test]
fn reordered_packets_accepted() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();
    let a = pattern(10);
    let b = pattern(20);

    let pa = client.process_outgoing(a.clone()).unwrap().unwrap();
    let pb = client.process_outgoing(b.clone()).unwrap().unwrap();

    assert_eq!(server.process_incoming(pb).unwrap(), Some(b));
    assert_eq!(server.process_incoming(pa).unwrap(), Some(a));
}

#[test]
fn corrupt_packet_keeps_state() {
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();
    let packet = client.process_outgoing(pattern(64)).unwrap().unwrap();

    // Flip one ciphertext bit past the record header.
    let mut bytes = packet.as_bytes().to_vec();
    bytes[20] ^= 0x10;
    let corrupt = BitBuf::from_bits(bytes, packet.len());

    let result = server.process_incoming(corrupt);
    assert!(matches!(result, Err(PacketError::Decrypt(_))));
    assert_eq!(server.state(), ChannelState::Encrypted);

    // The original still decrypts.
    assert_eq!(server.process_incoming(packet).unwrap(), Some(pattern(64)));
}

#[test]
fn too_large_payload_rejected() {
    init_logging();

    let (mut client, _server) = encrypted_psk_pair();
    let max = client.max_payload_bits() as usize;

    let result = client.process_outgoing(pattern(max + 1));
    assert!(matches!(result, Err(PacketError::TooLarge { .. })));
    assert_eq!(client.state(), ChannelState::Encrypted);
}

#[test]
fn every_length_up_to_max_fits_budget() {
    //! For any plaintext of at most budget - reserved bits the packet fits
    //! the budget and round trips, right up to the advertised maximum.
    init_logging();

    let (mut client, mut server) = encrypted_psk_pair();
    let budget = client.transport().budget as usize;
    let max = client.max_payload_bits() as usize;
    assert_eq!(max, budget - client.reserved_framing_bits() as usize);

    for len in (0..=max).step_by(37).chain(max - 16..=max) {
        let p = client
            .process_outgoing(pattern(len))
            .unwrap_or_else(|e| panic!("payload {} refused: {}", len, e))
            .expect("packet");
        assert!(p.len() <= budget, "{} bits for payload {}", p.len(), len);
        assert_eq!(server.process_incoming(p).unwrap(), Some(pattern(len)));
    }
}

#[test]
fn max_payload_at_odd_budgets() {
    //! Budgets on every bit alignment, with the payload at the limit.
    init_logging();

    for budget in (BUDGET - 8)..=BUDGET {
        let (mut client, mut server) = psk_pair(budget, b"k", b"k");
        enable_both(&mut client, &mut server);
        handshake(&mut client, &mut server);

        let max = client.max_payload_bits();
        assert_eq!(max, budget - 242);

        let payload = pattern(max as usize);
        let packet = client.process_outgoing(payload.clone()).unwrap().unwrap();
        assert!(packet.len() <= budget as usize);
        assert_eq!(server.process_incoming(packet).unwrap(), Some(payload));

        assert!(matches!(
            client.process_outgoing(pattern(max as usize + 1)),
            Err(PacketError::TooLarge { .. })
        ));
    }
}
