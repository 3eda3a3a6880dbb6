use std::mem;
use std::sync::Arc;
use std::time::Duration;

use der::Decode;
use p256::ecdsa::{Signature, VerifyingKey};
use signature::{Signer, Verifier};
use spki::ObjectIdentifier;
use subtle::ConstantTimeEq;
use tinyvec::ArrayVec;
use x509_cert::Certificate as X509Certificate;

use super::handshake::{self, Fragment, Insertion, MessageType, Reassembler};
use super::keys::{self, KeyExchange, MasterSecret, RecordKeys, RANDOM_LEN};
use super::message::{self, Hello, Mode};
use super::record::{self, ContentType, Record, MAX_SEQUENCE};
use super::timer::ExponentialBackoff;
use super::window::ReplayWindow;
use super::{Credentials, HANDSHAKE_HEADER_LEN, RECORD_HEADER_LEN, RECORD_OVERHEAD};
use crate::certificate::calculate_fingerprint;
use crate::rng::SeededRng;
use crate::{Config, Error, HandshakeStatus, Role, Session, Want};

const HANDSHAKE_EPOCH: u16 = 0;
const APPLICATION_EPOCH: u16 = 1;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SendClientHello,
    AwaitServerHello,
    AwaitCertificate,
    AwaitCertificateVerify,
    AwaitServerFinished,
    AwaitClientHello,
    AwaitClientFinished,
    Complete,
}

/// One handshake message of the flight in flight, kept for retransmission.
#[derive(Debug, Default)]
struct FlightMessage {
    msg_type: MessageType,
    message_seq: u16,
    body: Vec<u8>,
}

/// A [`Session`] of the built-in engine.
pub(crate) struct DtlsSession {
    role: Role,
    config: Arc<Config>,
    credentials: Credentials,
    rng: SeededRng,
    state: State,

    /// Largest datagram we produce.
    max_datagram: usize,
    max_plaintext: usize,

    key_exchange: Option<KeyExchange>,
    client_random: [u8; RANDOM_LEN],
    server_random: [u8; RANDOM_LEN],
    peer_certificate: Option<Vec<u8>>,
    master: Option<MasterSecret>,
    keys: Option<RecordKeys>,

    /// Every handshake message so far, unfragmented.
    transcript: Vec<u8>,
    reassembler: Reassembler,
    next_send_seq: u16,
    next_receive_seq: u16,

    handshake_record_seq: u64,
    application_record_seq: u64,
    replay: ReplayWindow,

    flight: ArrayVec<[FlightMessage; 4]>,
    /// The flight answers a complete flight of the peer. Only then does a
    /// retransmitted peer message mean ours was lost.
    flight_is_reply: bool,
    flight_deadline: Option<Duration>,
    backoff: ExponentialBackoff,
    resend_requested: bool,

    started_at: Option<Duration>,
    output: Vec<Vec<u8>>,
    failure: Option<Error>,
}

impl DtlsSession {
    pub fn new(
        role: Role,
        config: Arc<Config>,
        credentials: Credentials,
        max_plaintext: usize,
    ) -> Self {
        let mut rng = SeededRng::new(config.rng_seed(), role);
        let backoff =
            ExponentialBackoff::new(config.flight_start_rto(), config.flight_retries(), &mut rng);

        let state = match role {
            Role::Client => State::SendClientHello,
            Role::Server => State::AwaitClientHello,
        };

        DtlsSession {
            role,
            config,
            credentials,
            rng,
            state,
            max_datagram: max_plaintext + RECORD_OVERHEAD,
            max_plaintext,
            key_exchange: None,
            client_random: [0; RANDOM_LEN],
            server_random: [0; RANDOM_LEN],
            peer_certificate: None,
            master: None,
            keys: None,
            transcript: Vec::new(),
            reassembler: Reassembler::new(),
            next_send_seq: 0,
            next_receive_seq: 0,
            handshake_record_seq: 0,
            application_record_seq: 0,
            replay: ReplayWindow::new(),
            flight: ArrayVec::default(),
            flight_is_reply: false,
            flight_deadline: None,
            backoff,
            resend_requested: false,
            started_at: None,
            output: Vec::new(),
            failure: None,
        }
    }

    fn mode(&self) -> Mode {
        if self.credentials.is_pre_shared_key() {
            Mode::PreSharedKey
        } else {
            Mode::Certificate
        }
    }

    fn master(&self) -> Result<&MasterSecret, Error> {
        self.master
            .as_ref()
            .ok_or_else(|| Error::Crypto("no master secret".into()))
    }

    fn record_message(&mut self, msg_type: MessageType, message_seq: u16, body: &[u8]) {
        self.transcript
            .extend_from_slice(&handshake::transcript_bytes(msg_type, message_seq, body));
    }

    /// Add a message to the flight being built, and to the transcript.
    fn push_message(&mut self, msg_type: MessageType, body: Vec<u8>) {
        let message_seq = self.next_send_seq;
        self.next_send_seq += 1;

        self.record_message(msg_type, message_seq, &body);
        self.flight.push(FlightMessage {
            msg_type,
            message_seq,
            body,
        });
    }

    fn start_flight(&mut self, is_reply: bool) {
        self.flight.clear();
        self.flight_is_reply = is_reply;
        self.flight_deadline = None;
        self.backoff.reset(&mut self.rng);
    }

    /// Serialize the current flight into datagrams, packing records until a
    /// datagram is full.
    fn send_flight(&mut self, now: Duration) -> Result<(), Error> {
        let max_body = self.max_datagram - RECORD_HEADER_LEN - HANDSHAKE_HEADER_LEN;

        let mut datagram: Vec<u8> = Vec::with_capacity(self.max_datagram);
        let mut datagrams = Vec::new();

        for msg in &self.flight {
            for fragment in handshake::fragment(msg.msg_type, msg.message_seq, &msg.body, max_body)
            {
                if !datagram.is_empty()
                    && datagram.len() + RECORD_HEADER_LEN + fragment.len() > self.max_datagram
                {
                    datagrams.push(mem::take(&mut datagram));
                }

                let seq = self.handshake_record_seq;
                if seq > MAX_SEQUENCE {
                    return Err(Error::Crypto("handshake sequence exhausted".into()));
                }
                self.handshake_record_seq += 1;

                Record {
                    content_type: ContentType::Handshake,
                    version: super::DTLS_VERSION,
                    epoch: HANDSHAKE_EPOCH,
                    sequence_number: seq,
                    fragment: &fragment,
                }
                .serialize(&mut datagram);
            }
        }

        if !datagram.is_empty() {
            datagrams.push(datagram);
        }

        trace!(
            "{:?} flight of {} messages in {} datagrams",
            self.role,
            self.flight.len(),
            datagrams.len()
        );

        self.output.extend(datagrams);

        self.flight_deadline = if self.state == State::Complete {
            None
        } else {
            Some(now.saturating_add(self.backoff.rto()))
        };

        Ok(())
    }

    fn send_client_hello(&mut self, now: Duration) -> Result<(), Error> {
        let key_exchange = KeyExchange::new(&mut self.rng);
        self.client_random = self.rng.random();

        let hello = Hello::new(self.client_random, self.mode(), key_exchange.public_key());
        self.key_exchange = Some(key_exchange);

        let mut body = Vec::new();
        hello.serialize(&mut body);

        self.start_flight(false);
        self.push_message(MessageType::ClientHello, body);
        self.state = State::AwaitServerHello;

        debug!("Client send ClientHello");
        self.send_flight(now)
    }

    fn derive_keys(&mut self, peer_share: &[u8; keys::KEY_SHARE_LEN]) -> Result<(), Error> {
        let key_exchange = self
            .key_exchange
            .take()
            .ok_or_else(|| Error::Crypto("no key exchange".into()))?;

        let ecdhe = key_exchange.complete(peer_share).map_err(Error::Security)?;

        let psk = match &self.credentials {
            Credentials::PreSharedKey(key) => Some(key.as_slice()),
            _ => None,
        };
        let pre_master = keys::pre_master_secret(&ecdhe, psk);

        let master = MasterSecret::derive(&pre_master, &self.client_random, &self.server_random)
            .map_err(Error::Crypto)?;
        let keys = master
            .record_keys(self.role, &self.client_random, &self.server_random)
            .map_err(Error::Crypto)?;

        self.master = Some(master);
        self.keys = Some(keys);

        Ok(())
    }

    fn check_mode(&self, hello: &Hello) -> Result<(), Error> {
        if hello.mode != self.mode() {
            return Err(Error::Security(format!(
                "peer in {:?} mode, we are in {:?} mode",
                hello.mode,
                self.mode()
            )));
        }
        Ok(())
    }

    fn check_finished(&self, label: &str, body: &[u8]) -> Result<(), Error> {
        let received = message::parse_finished(body)?;
        let expected = self
            .master()?
            .verify_data(label, &self.transcript)
            .map_err(Error::Crypto)?;

        if !bool::from(received.ct_eq(&expected)) {
            return Err(Error::Security(format!("{} verify data mismatch", label)));
        }
        Ok(())
    }

    fn finished_body(&self, label: &str) -> Result<Vec<u8>, Error> {
        let verify_data = self
            .master()?
            .verify_data(label, &self.transcript)
            .map_err(Error::Crypto)?;
        Ok(verify_data.to_vec())
    }

    fn handle_message(
        &mut self,
        msg_type: MessageType,
        message_seq: u16,
        body: Vec<u8>,
        now: Duration,
    ) -> Result<(), Error> {
        trace!("{:?} received {:?} in {:?}", self.role, msg_type, self.state);

        match (self.state, msg_type) {
            (State::AwaitClientHello, MessageType::ClientHello) => {
                let hello = Hello::parse(&body)?;
                self.check_mode(&hello)?;
                self.record_message(msg_type, message_seq, &body);
                self.client_random = hello.random;
                self.send_server_flight(&hello, now)
            }

            (State::AwaitServerHello, MessageType::ServerHello) => {
                let hello = Hello::parse(&body)?;
                self.check_mode(&hello)?;
                self.record_message(msg_type, message_seq, &body);
                self.server_random = hello.random;
                self.derive_keys(&hello.key_share)?;

                self.state = match self.mode() {
                    Mode::PreSharedKey => State::AwaitServerFinished,
                    Mode::Certificate => State::AwaitCertificate,
                };
                Ok(())
            }

            (State::AwaitCertificate, MessageType::Certificate) => {
                let der = message::parse_certificate(&body)?;

                let Credentials::Fingerprint(expected) = &self.credentials else {
                    return Err(Error::Crypto("certificate without fingerprint".into()));
                };

                let actual = calculate_fingerprint(der);
                if !bool::from(actual.ct_eq(expected)) {
                    return Err(Error::Security("certificate fingerprint mismatch".into()));
                }

                self.peer_certificate = Some(der.to_vec());
                self.record_message(msg_type, message_seq, &body);
                self.state = State::AwaitCertificateVerify;
                Ok(())
            }

            (State::AwaitCertificateVerify, MessageType::CertificateVerify) => {
                let signature = message::parse_certificate_verify(&body)?;
                let cert = self
                    .peer_certificate
                    .as_deref()
                    .ok_or_else(|| Error::Crypto("no peer certificate".into()))?;

                verify_signature(cert, &self.transcript, signature).map_err(Error::Security)?;

                self.record_message(msg_type, message_seq, &body);
                self.state = State::AwaitServerFinished;
                Ok(())
            }

            (State::AwaitServerFinished, MessageType::Finished) => {
                self.check_finished("server finished", &body)?;
                self.record_message(msg_type, message_seq, &body);

                let finished = self.finished_body("client finished")?;

                self.start_flight(true);
                self.push_message(MessageType::Finished, finished);
                self.state = State::Complete;

                debug!("Client send Finished");
                self.send_flight(now)
            }

            (State::AwaitClientFinished, MessageType::Finished) => {
                self.check_finished("client finished", &body)?;
                self.record_message(msg_type, message_seq, &body);

                self.flight.clear();
                self.flight_deadline = None;
                self.state = State::Complete;
                Ok(())
            }

            (state, msg_type) => Err(Error::UnexpectedMessage(format!(
                "{:?} in {:?}",
                msg_type, state
            ))),
        }
    }

    fn send_server_flight(&mut self, client_hello: &Hello, now: Duration) -> Result<(), Error> {
        self.key_exchange = Some(KeyExchange::new(&mut self.rng));
        self.server_random = self.rng.random();

        let share = self
            .key_exchange
            .as_ref()
            .map(|kx| kx.public_key())
            .ok_or_else(|| Error::Crypto("no key exchange".into()))?;

        self.derive_keys(&client_hello.key_share)?;

        self.start_flight(true);

        let mut body = Vec::new();
        Hello::new(self.server_random, self.mode(), share).serialize(&mut body);
        self.push_message(MessageType::ServerHello, body);

        let certificate = match &self.credentials {
            Credentials::Certificate { cert, key } => Some((Arc::clone(cert), key.clone())),
            _ => None,
        };

        if let Some((cert, signing_key)) = certificate {
            let mut body = Vec::new();
            message::serialize_certificate(&cert.certificate, &mut body);
            self.push_message(MessageType::Certificate, body);

            let signature: Signature = signing_key
                .try_sign(&self.transcript)
                .map_err(|e| Error::Crypto(format!("signing failed: {}", e)))?;

            let mut body = Vec::new();
            message::serialize_certificate_verify(signature.to_der().as_bytes(), &mut body);
            self.push_message(MessageType::CertificateVerify, body);
        }

        let finished = self.finished_body("server finished")?;
        self.push_message(MessageType::Finished, finished);
        self.state = State::AwaitClientFinished;

        debug!("Server send flight of {} messages", self.flight.len());
        self.send_flight(now)
    }

    fn retransmit_if_due(&mut self, now: Duration) -> Result<(), Error> {
        if self.flight.is_empty() {
            self.resend_requested = false;
            return Ok(());
        }

        if mem::take(&mut self.resend_requested) {
            debug!("{:?} resend flight on peer retransmission", self.role);
            return self.send_flight(now);
        }

        let Some(deadline) = self.flight_deadline else {
            return Ok(());
        };

        if now < deadline {
            return Ok(());
        }

        if !self.backoff.can_retry() {
            trace!("{:?} flight retries exhausted", self.role);
            self.flight_deadline = None;
            return Ok(());
        }

        self.backoff.attempt(&mut self.rng);
        debug!(
            "{:?} flight timer expired, resend (next rto {:?})",
            self.role,
            self.backoff.rto()
        );
        self.send_flight(now)
    }

    fn process(&mut self, now: Duration) -> Result<(), Error> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }

        let started = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_sub(started);
        if elapsed >= self.config.handshake_timeout() {
            warn!("{:?} handshake timed out after {:?}", self.role, elapsed);
            return Err(Error::Timeout);
        }

        if self.state == State::SendClientHello {
            self.send_client_hello(now)?;
        }

        while self.state != State::Complete {
            let Some((msg_type, body)) = self.reassembler.pop(self.next_receive_seq) else {
                break;
            };
            let message_seq = self.next_receive_seq;
            self.next_receive_seq += 1;
            self.handle_message(msg_type, message_seq, body, now)?;
        }

        if self.state != State::Complete {
            self.retransmit_if_due(now)?;
        }

        Ok(())
    }

    fn keys(&self) -> Result<&RecordKeys, Error> {
        if self.state != State::Complete {
            return Err(Error::HandshakeIncomplete);
        }
        self.keys.as_ref().ok_or(Error::HandshakeIncomplete)
    }
}

/// Check an ECDSA P-256 SHA-256 signature made by the key in `cert_der`.
fn verify_signature(cert_der: &[u8], data: &[u8], signature: &[u8]) -> Result<(), String> {
    let cert = X509Certificate::from_der(cert_der)
        .map_err(|e| format!("Failed to parse certificate: {e}"))?;
    let spki = &cert.tbs_certificate.subject_public_key_info;

    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(format!(
            "Unsupported public key algorithm: {}",
            spki.algorithm.oid
        ));
    }

    let pubkey_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| "Invalid EC subject_public_key bitstring".to_string())?;

    let verifying_key = VerifyingKey::from_sec1_bytes(pubkey_bytes)
        .map_err(|_| "Invalid P-256 public key".to_string())?;
    let signature =
        Signature::from_der(signature).map_err(|_| "Invalid signature format".to_string())?;

    verifying_key
        .verify(data, &signature)
        .map_err(|_| "ECDSA signature verification failed".to_string())
}

impl Session for DtlsSession {
    fn advance_handshake(&mut self, now: Duration) -> Result<HandshakeStatus, Error> {
        self.process(now)?;

        Ok(if self.state == State::Complete {
            HandshakeStatus::Complete
        } else if !self.output.is_empty() {
            HandshakeStatus::WouldBlock(Want::Write)
        } else {
            HandshakeStatus::WouldBlock(Want::Read)
        })
    }

    fn is_handshake_complete(&self) -> bool {
        self.state == State::Complete
    }

    fn drain_pending_output(&mut self) -> Vec<Vec<u8>> {
        mem::take(&mut self.output)
    }

    fn write_input(&mut self, data: &[u8]) -> Result<usize, Error> {
        for record in record::parse_datagram(data)? {
            if record.content_type != ContentType::Handshake || record.epoch != HANDSHAKE_EPOCH {
                return Err(Error::UnexpectedMessage(format!(
                    "{:?} record in epoch {} during handshake",
                    record.content_type, record.epoch
                )));
            }

            let mut input = record.fragment;
            while !input.is_empty() {
                let (rest, fragment) = Fragment::parse(input)?;
                input = rest;

                match self.reassembler.insert(&fragment, self.next_receive_seq) {
                    Ok(Insertion::Old) => {
                        if self.flight_is_reply {
                            self.resend_requested = true;
                        }
                    }
                    Ok(_) => {}
                    Err(e @ Error::TooLarge { .. }) => {
                        // A peer announcing oversized messages cannot finish.
                        self.failure = Some(Error::UnexpectedMessage(e.to_string()));
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(data.len())
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        if plaintext.len() > self.max_plaintext {
            return Err(Error::TooLarge {
                size: plaintext.len(),
                max: self.max_plaintext,
            });
        }

        let seq = self.application_record_seq;
        if seq > MAX_SEQUENCE {
            return Err(Error::Crypto("application sequence exhausted".into()));
        }

        let keys = self.keys()?;

        let mut datagram = Vec::with_capacity(plaintext.len() + RECORD_OVERHEAD);
        record::write_header(
            ContentType::ApplicationData,
            APPLICATION_EPOCH,
            seq,
            plaintext.len() + super::GCM_TAG_LEN,
            &mut datagram,
        );

        let ciphertext = keys
            .write
            .seal(APPLICATION_EPOCH, seq, &datagram, plaintext)
            .map_err(Error::Crypto)?;
        datagram.extend_from_slice(&ciphertext);

        self.application_record_seq += 1;

        Ok(datagram)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let keys = self.keys()?;

        let (rest, record) = Record::parse(ciphertext)?;
        if !rest.is_empty() {
            return Err(Error::UnexpectedMessage(format!(
                "{} bytes after application record",
                rest.len()
            )));
        }

        if record.content_type != ContentType::ApplicationData
            || record.epoch != APPLICATION_EPOCH
            || record.version != super::DTLS_VERSION
        {
            return Err(Error::UnexpectedMessage(format!(
                "{:?} record in epoch {}",
                record.content_type, record.epoch
            )));
        }

        let seq = record.sequence_number;
        if !self.replay.is_fresh(seq) {
            return Err(Error::Replay(seq));
        }

        let aad = &ciphertext[..RECORD_HEADER_LEN];
        let plaintext = keys
            .read
            .open(APPLICATION_EPOCH, seq, aad, record.fragment)
            .map_err(Error::Crypto)?;

        self.replay.update(seq);

        Ok(plaintext)
    }
}

impl std::fmt::Debug for DtlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsSession")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("credentials", &self.credentials)
            .field("next_send_seq", &self.next_send_seq)
            .field("next_receive_seq", &self.next_receive_seq)
            .field("flight", &self.flight.len())
            .field("output", &self.output.len())
            .finish_non_exhaustive()
    }
}
