use std::fmt;

use zeroize::Zeroizing;

use crate::certificate::format_fingerprint;
use crate::{Error, Role};

/// Length of a peer certificate fingerprint (SHA-256).
pub const FINGERPRINT_LENGTH: usize = 32;

/// Material a session authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityMaterial {
    /// Symmetric key known to both ends. Any length, the engine decides.
    PreSharedKey(Zeroizing<Vec<u8>>),
    /// Id of the server's own certificate in the engine's certificate store.
    ServerCertificateId(String),
    /// SHA-256 fingerprint the client expects of the server certificate.
    ExpectedPeerFingerprint([u8; FINGERPRINT_LENGTH]),
}

impl IdentityMaterial {
    /// Wrap a pre-shared key.
    pub fn pre_shared_key(key: &[u8]) -> Self {
        IdentityMaterial::PreSharedKey(Zeroizing::new(key.to_vec()))
    }

    /// Wrap a fingerprint, checking its length.
    pub fn fingerprint(bytes: &[u8]) -> Result<Self, Error> {
        let fp: [u8; FINGERPRINT_LENGTH] =
            bytes.try_into().map_err(|_| Error::FingerprintLength {
                expected: FINGERPRINT_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(IdentityMaterial::ExpectedPeerFingerprint(fp))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            IdentityMaterial::PreSharedKey(_) => "PreSharedKey",
            IdentityMaterial::ServerCertificateId(_) => "ServerCertificateId",
            IdentityMaterial::ExpectedPeerFingerprint(_) => "ExpectedPeerFingerprint",
        }
    }

    fn fits(&self, role: Role, pre_shared_keys: bool) -> bool {
        match self {
            IdentityMaterial::PreSharedKey(_) => pre_shared_keys,
            IdentityMaterial::ServerCertificateId(_) => !pre_shared_keys && role == Role::Server,
            IdentityMaterial::ExpectedPeerFingerprint(_) => {
                !pre_shared_keys && role == Role::Client
            }
        }
    }
}

impl fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityMaterial::PreSharedKey(key) => f
                .debug_struct("PreSharedKey")
                .field("len", &key.len())
                .finish_non_exhaustive(),
            IdentityMaterial::ServerCertificateId(id) => {
                f.debug_tuple("ServerCertificateId").field(id).finish()
            }
            IdentityMaterial::ExpectedPeerFingerprint(fp) => f
                .debug_tuple("ExpectedPeerFingerprint")
                .field(&format_fingerprint(fp))
                .finish(),
        }
    }
}

/// Holds the identity material of one multiplexer.
///
/// Assignment is validated against the role and key mode. A rejected
/// assignment leaves the previous material in place.
#[derive(Debug)]
pub(crate) struct IdentityStore {
    role: Role,
    pre_shared_keys: bool,
    material: Option<IdentityMaterial>,
}

impl IdentityStore {
    pub fn new(role: Role, pre_shared_keys: bool) -> Self {
        IdentityStore {
            role,
            pre_shared_keys,
            material: None,
        }
    }

    /// Pick the material that applies to the role and key mode.
    pub fn set_encryption_data(
        &mut self,
        key: &[u8],
        fingerprint: &[u8],
        cert_id: &str,
    ) -> Result<(), Error> {
        let material = if self.pre_shared_keys {
            IdentityMaterial::pre_shared_key(key)
        } else {
            match self.role {
                Role::Server => IdentityMaterial::ServerCertificateId(cert_id.to_string()),
                Role::Client => IdentityMaterial::fingerprint(fingerprint).inspect_err(|e| {
                    error!("Rejected peer fingerprint: {}", e);
                })?,
            }
        };

        self.material = Some(material);
        Ok(())
    }

    pub fn set(&mut self, material: IdentityMaterial) -> Result<(), Error> {
        if !material.fits(self.role, self.pre_shared_keys) {
            error!(
                "Rejected identity {} for {:?} (pre_shared_keys: {})",
                material.kind(),
                self.role,
                self.pre_shared_keys
            );
            return Err(Error::IdentityMismatch(material.kind()));
        }

        self.material = Some(material);
        Ok(())
    }

    pub fn get(&self) -> Option<&IdentityMaterial> {
        self.material.as_ref()
    }
}
