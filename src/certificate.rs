//! Certificate generation, fingerprints and the server certificate store.
//!
//! A server in certificate mode names its certificate by an opaque id. The
//! [`CertStore`] resolves that id to the DER encoded certificate and its
//! private key. Clients pin the server by the SHA-256 fingerprint of the
//! certificate, there is no trust chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};

use crate::FINGERPRINT_LENGTH;

/// Certificate utility error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// Certificate generation failed
    GenerationFailed,
    /// An id is already taken in the store
    DuplicateId(String),
}

impl fmt::Display for CertificateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateError::GenerationFailed => write!(f, "Certificate generation failed"),
            CertificateError::DuplicateId(id) => write!(f, "Certificate id already in use: {}", id),
        }
    }
}

impl std::error::Error for CertificateError {}

/// Certificate and private key pair
#[derive(Clone)]
pub struct DtlsCertificate {
    /// Certificate in DER format
    pub certificate: Vec<u8>,
    /// Private key in PKCS#8 DER format
    pub private_key: Vec<u8>,
}

/// Generate a self-signed P-256 certificate.
pub fn generate_self_signed_certificate() -> Result<DtlsCertificate, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|_| CertificateError::GenerationFailed)?;

    let mut params = CertificateParams::new(vec!["dimux".to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "dimux".to_string());
    distinguished_name.push(DnType::CommonName, "dimux server".to_string());
    params.distinguished_name = distinguished_name;

    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair);

    // Validity is not checked by peers, fingerprints are.
    let not_before = time::OffsetDateTime::now_utc();
    let not_after = not_before + time::Duration::days(365);
    params.not_before = not_before;
    params.not_after = not_after;

    let cert =
        RcgenCertificate::from_params(params).map_err(|_| CertificateError::GenerationFailed)?;

    let cert_der = cert
        .serialize_der()
        .map_err(|_| CertificateError::GenerationFailed)?;

    let key_der = cert.serialize_private_key_der();

    Ok(DtlsCertificate {
        certificate: cert_der,
        private_key: key_der,
    })
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> [u8; FINGERPRINT_LENGTH] {
    Sha256::digest(cert_der).into()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl DtlsCertificate {
    /// The SHA-256 fingerprint of the DER certificate.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LENGTH] {
        calculate_fingerprint(&self.certificate)
    }

    /// The fingerprint as uppercase hex pairs separated by colons.
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for DtlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsCertificate")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// Server certificates by id.
#[derive(Debug, Default, Clone)]
pub struct CertStore {
    certs: HashMap<String, Arc<DtlsCertificate>>,
}

impl CertStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a certificate under `id`, replacing any previous one.
    pub fn insert(&mut self, id: impl Into<String>, cert: DtlsCertificate) {
        let id = id.into();
        debug!("Store certificate {}: {}", id, cert.fingerprint_str());
        self.certs.insert(id, Arc::new(cert));
    }

    /// Generate a self-signed certificate under a new `id`.
    ///
    /// Returns the fingerprint clients should pin.
    pub fn generate(
        &mut self,
        id: impl Into<String>,
    ) -> Result<[u8; FINGERPRINT_LENGTH], CertificateError> {
        let id = id.into();
        if self.certs.contains_key(&id) {
            return Err(CertificateError::DuplicateId(id));
        }

        let cert = generate_self_signed_certificate()?;
        let fingerprint = cert.fingerprint();
        self.insert(id, cert);

        Ok(fingerprint)
    }

    /// Look up the certificate for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<DtlsCertificate>> {
        self.certs.get(id).cloned()
    }

    /// Fingerprint of the certificate for `id`.
    pub fn fingerprint(&self, id: &str) -> Option<[u8; FINGERPRINT_LENGTH]> {
        self.certs.get(id).map(|c| c.fingerprint())
    }

    /// Remove the certificate for `id`.
    pub fn remove(&mut self, id: &str) -> Option<Arc<DtlsCertificate>> {
        self.certs.remove(id)
    }

    /// Number of stored certificates.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}
