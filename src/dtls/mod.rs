//! Built-in DTLS 1.2 flavoured engine.
//!
//! One cipher suite, one key exchange:
//!
//! * X25519 ECDHE, optionally mixed with a pre-shared key
//! * ECDSA P-256 server certificates, pinned by SHA-256 fingerprint
//! * AES-128-GCM application records
//!
//! ```text
//! Client                                         Server
//!
//! ClientHello              -------->
//!                                           ServerHello
//!                                          Certificate*
//!                                    CertificateVerify*
//!                          <--------           Finished
//! Finished                 -------->
//! ```
//!
//! Messages marked `*` are sent in certificate mode only. Handshake records
//! travel unprotected in epoch 0, the Finished messages authenticate the
//! transcript. Application data is epoch 1.

use std::sync::Arc;

use p256::ecdsa::SigningKey;
use pkcs8::DecodePrivateKey;
use zeroize::Zeroizing;

use crate::certificate::{CertStore, DtlsCertificate};
use crate::{Config, CryptoEngine, Error, IdentityMaterial, Role, Session};
use crate::{framing, FINGERPRINT_LENGTH};

mod handshake;
mod keys;
mod message;
mod record;
mod session;
mod timer;
mod window;

use session::DtlsSession;

pub(crate) const DTLS_VERSION: u16 = 0xFEFD;
pub(crate) const RECORD_HEADER_LEN: usize = 13;
pub(crate) const HANDSHAKE_HEADER_LEN: usize = 12;
pub(crate) const GCM_TAG_LEN: usize = 16;

/// Bytes an application record adds to its plaintext.
pub(crate) const RECORD_OVERHEAD: usize = RECORD_HEADER_LEN + GCM_TAG_LEN;

/// Below this a handshake would need hundreds of fragments.
const MIN_PLAINTEXT_SIZE: usize = 16;

// The framing reserve must cover the record overhead.
const _: () = assert!(
    (RECORD_OVERHEAD as u32) * 8 <= framing::reserved_framing_bits(),
    "record overhead exceeds reserved framing bits"
);

/// The built-in [`CryptoEngine`].
///
/// Servers in certificate mode need their certificates registered in the
/// engine's [`CertStore`] under the id given as
/// [`IdentityMaterial::ServerCertificateId`].
#[derive(Debug)]
pub struct DtlsEngine {
    config: Arc<Config>,
    certificates: CertStore,
}

/// What a session authenticates with, resolved from [`IdentityMaterial`].
pub(crate) enum Credentials {
    PreSharedKey(Zeroizing<Vec<u8>>),
    Certificate {
        cert: Arc<DtlsCertificate>,
        key: SigningKey,
    },
    Fingerprint([u8; FINGERPRINT_LENGTH]),
}

impl Credentials {
    fn resolve(
        role: Role,
        identity: &IdentityMaterial,
        certificates: &CertStore,
    ) -> Result<Self, Error> {
        match (role, identity) {
            (_, IdentityMaterial::PreSharedKey(key)) => {
                if key.is_empty() {
                    return Err(Error::Config("empty pre-shared key".into()));
                }
                Ok(Credentials::PreSharedKey(key.clone()))
            }
            (Role::Server, IdentityMaterial::ServerCertificateId(id)) => {
                let cert = certificates
                    .get(id)
                    .ok_or_else(|| Error::UnknownCertificate(id.clone()))?;

                let key = SigningKey::from_pkcs8_der(&cert.private_key)
                    .map_err(|e| Error::Certificate(format!("private key for {}: {}", id, e)))?;

                Ok(Credentials::Certificate { cert, key })
            }
            (Role::Client, IdentityMaterial::ExpectedPeerFingerprint(fp)) => {
                Ok(Credentials::Fingerprint(*fp))
            }
            (_, other) => Err(Error::IdentityMismatch(other.kind())),
        }
    }

    pub fn is_pre_shared_key(&self) -> bool {
        matches!(self, Credentials::PreSharedKey(_))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::PreSharedKey(_) => f.write_str("PreSharedKey"),
            Credentials::Certificate { cert, .. } => f
                .debug_tuple("Certificate")
                .field(&cert.fingerprint_str())
                .finish(),
            Credentials::Fingerprint(_) => f.write_str("Fingerprint"),
        }
    }
}

impl DtlsEngine {
    /// Engine without certificates. Enough for pre-shared keys and clients.
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_certificates(config, CertStore::new())
    }

    /// Engine resolving server certificate ids through `certificates`.
    pub fn with_certificates(config: Arc<Config>, certificates: CertStore) -> Self {
        DtlsEngine {
            config,
            certificates,
        }
    }

    /// The certificate store.
    pub fn certificates(&self) -> &CertStore {
        &self.certificates
    }
}

impl CryptoEngine for DtlsEngine {
    fn create_session(
        &self,
        role: Role,
        max_plaintext_size: usize,
        identity: &IdentityMaterial,
    ) -> Result<Box<dyn Session>, Error> {
        if max_plaintext_size < MIN_PLAINTEXT_SIZE {
            return Err(Error::Config(format!(
                "max plaintext size {} below {}",
                max_plaintext_size, MIN_PLAINTEXT_SIZE
            )));
        }

        let credentials = Credentials::resolve(role, identity, &self.certificates)?;

        debug!(
            "New {:?} session with {:?}, max plaintext {}",
            role, credentials, max_plaintext_size
        );

        Ok(Box::new(DtlsSession::new(
            role,
            Arc::clone(&self.config),
            credentials,
            max_plaintext_size,
        )))
    }
}
